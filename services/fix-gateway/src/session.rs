//! Per-connection FIX session state machine.
//!
//! The session is sans-IO: it consumes decoded messages and produces
//! outbound messages, so the whole protocol surface is testable without
//! sockets. The acceptor owns the socket, seals outbound messages with
//! this session's sequence numbers, and drives heartbeat timing.
//!
//! Inbound sequence gaps are reported with a Session Reject and the
//! peer's number is adopted; there is no resend request.

use fix::codec::Envelope;
use fix::message::{tags, FixMessage, MsgType};
use fix::{timestamp, DecodeError};
use matching_engine::events::ExchangeEvent;
use matching_engine::{CancelOutcome, NewOrderRequest};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::{info, warn};
use types::errors::ValidationError;
use types::ids::OrderId;
use types::numeric::Price;
use types::order::{OrdKind, Order, OrderStatus, Side};

use crate::config::GatewayConfig;
use crate::router::ReportSender;
use crate::state::Gateway;

/// FIX 4.2 CxlRejReason for "unknown order".
const CXL_REJ_UNKNOWN_ORDER: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingLogon,
    LoggedIn,
    Closing,
}

/// A message waiting to be sealed and written by the owning connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub msg_type: MsgType,
    pub body: Vec<(u32, String)>,
}

impl OutboundMessage {
    fn new(msg_type: MsgType) -> Self {
        Self {
            msg_type,
            body: Vec::new(),
        }
    }

    fn field(mut self, tag: u32, value: impl Into<String>) -> Self {
        self.body.push((tag, value.into()));
        self
    }

    pub fn get(&self, tag: u32) -> Option<&str> {
        self.body
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
struct OrderRef {
    order_id: OrderId,
    symbol: String,
}

pub struct Session {
    comp_id: String,
    peer: String,
    state: SessionState,
    client_comp_id: Option<String>,
    /// Next expected inbound MsgSeqNum.
    incoming_seq: u64,
    /// Next outbound MsgSeqNum.
    outgoing_seq: u64,
    heartbeat_secs: u64,
    client_orders: HashMap<String, OrderRef>,
    owned_ids: HashSet<OrderId>,
    reply_tx: ReportSender,
}

impl Session {
    pub fn new(config: &GatewayConfig, peer: impl Into<String>, reply_tx: ReportSender) -> Self {
        Self {
            comp_id: config.comp_id.clone(),
            peer: peer.into(),
            state: SessionState::AwaitingLogon,
            client_comp_id: None,
            incoming_seq: 1,
            outgoing_seq: 1,
            heartbeat_secs: config.default_heartbeat_secs,
            client_orders: HashMap::new(),
            owned_ids: HashSet::new(),
            reply_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == SessionState::LoggedIn
    }

    pub fn is_closing(&self) -> bool {
        self.state == SessionState::Closing
    }

    pub fn heartbeat_secs(&self) -> u64 {
        self.heartbeat_secs
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Orders this session submitted (for cancel-on-disconnect).
    pub fn owned_orders(&self) -> Vec<(OrderId, String)> {
        self.client_orders
            .values()
            .map(|r| (r.order_id, r.symbol.clone()))
            .collect()
    }

    /// Seal an outbound message with this session's envelope and next
    /// sequence number.
    pub fn seal(&mut self, message: &OutboundMessage) -> Vec<u8> {
        let seq = self.outgoing_seq;
        self.outgoing_seq += 1;
        let sending_time = timestamp::now_utc();
        fix::encode(
            &Envelope {
                msg_type: message.msg_type,
                sender: &self.comp_id,
                target: self.client_comp_id.as_deref().unwrap_or("CLIENT"),
                seq,
                sending_time: &sending_time,
            },
            &message.body,
        )
    }

    /// React to an undecodable frame.
    ///
    /// Checksum failures are treated as garbled transmission and dropped
    /// without a reply; structural errors earn a Session Reject. Either
    /// way the message is not processed.
    pub fn on_protocol_error(&mut self, err: &DecodeError) -> Option<OutboundMessage> {
        match err {
            DecodeError::ChecksumMismatch { expected, found } => {
                warn!(
                    peer = %self.peer,
                    expected,
                    found,
                    "dropping message with bad checksum"
                );
                None
            }
            other => {
                warn!(peer = %self.peer, %other, "rejecting malformed message");
                Some(self.session_reject(None, &other.to_string()))
            }
        }
    }

    /// Idle-side heartbeat, sent when nothing has gone out for a full
    /// interval.
    pub fn make_heartbeat(&self) -> OutboundMessage {
        OutboundMessage::new(MsgType::Heartbeat)
    }

    /// Process one decoded message, producing replies for this session's
    /// own socket. Reports for other sessions' orders go through the
    /// reply router instead.
    pub fn handle(&mut self, msg: &FixMessage, gateway: &Gateway) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        if self.state == SessionState::Closing {
            return out;
        }

        match msg.seq_num() {
            Some(seq) => {
                if seq != self.incoming_seq {
                    warn!(
                        peer = %self.peer,
                        expected = self.incoming_seq,
                        received = seq,
                        "inbound sequence gap"
                    );
                    out.push(self.session_reject(
                        Some(seq),
                        &format!(
                            "MsgSeqNum out of order: expected {}, received {}",
                            self.incoming_seq, seq
                        ),
                    ));
                }
                self.incoming_seq = seq + 1;
            }
            None => {
                out.push(self.session_reject(None, "missing or invalid MsgSeqNum"));
                return out;
            }
        }

        let Some(msg_type) = msg.msg_type() else {
            out.push(self.session_reject(
                msg.seq_num(),
                &format!(
                    "unsupported MsgType: {}",
                    msg.raw_msg_type().unwrap_or_default()
                ),
            ));
            return out;
        };

        match (self.state, msg_type) {
            (SessionState::AwaitingLogon, MsgType::Logon) => self.handle_logon(msg, &mut out),
            (SessionState::AwaitingLogon, _) => {
                out.push(self.session_reject(msg.seq_num(), "not logged on"));
            }
            (SessionState::LoggedIn, MsgType::Logon) => {
                // Duplicate logon: re-acknowledge.
                out.push(self.logon_ack());
            }
            (SessionState::LoggedIn, MsgType::Heartbeat) => {
                let mut reply = OutboundMessage::new(MsgType::Heartbeat);
                if let Some(test_req_id) = msg.get(tags::TEST_REQ_ID) {
                    reply = reply.field(tags::TEST_REQ_ID, test_req_id);
                }
                out.push(reply);
            }
            (SessionState::LoggedIn, MsgType::NewOrderSingle) => {
                self.handle_new_order(msg, gateway, &mut out);
            }
            (SessionState::LoggedIn, MsgType::OrderCancelRequest) => {
                self.handle_cancel(msg, gateway, &mut out);
            }
            (SessionState::LoggedIn, MsgType::Logout) => {
                info!(peer = %self.peer, "logout");
                self.state = SessionState::Closing;
                out.push(OutboundMessage::new(MsgType::Logout));
            }
            (SessionState::LoggedIn, other) => {
                out.push(self.session_reject(
                    msg.seq_num(),
                    &format!("unexpected message type: {}", other.as_str()),
                ));
            }
            (SessionState::Closing, _) => {}
        }

        out
    }

    fn handle_logon(&mut self, msg: &FixMessage, out: &mut Vec<OutboundMessage>) {
        let sender = msg.sender().unwrap_or_default();
        let target = msg.target().unwrap_or_default();
        if sender.is_empty() || target != self.comp_id {
            warn!(peer = %self.peer, sender, target, "logon with invalid comp ids");
            out.push(self.session_reject(msg.seq_num(), "invalid SenderCompID/TargetCompID"));
            return;
        }

        self.client_comp_id = Some(sender.to_string());
        if let Some(interval) = msg.get(tags::HEART_BT_INT).and_then(|v| v.parse().ok()) {
            self.heartbeat_secs = interval;
        }
        self.state = SessionState::LoggedIn;
        info!(
            peer = %self.peer,
            client = sender,
            heartbeat = self.heartbeat_secs,
            "session logged in"
        );
        out.push(self.logon_ack());
    }

    fn logon_ack(&self) -> OutboundMessage {
        OutboundMessage::new(MsgType::Logon)
            .field(tags::HEART_BT_INT, self.heartbeat_secs.to_string())
    }

    fn handle_new_order(
        &mut self,
        msg: &FixMessage,
        gateway: &Gateway,
        out: &mut Vec<OutboundMessage>,
    ) {
        let cl_ord_id = msg.get(tags::CL_ORD_ID).unwrap_or_default().to_string();
        let symbol = msg.get(tags::SYMBOL).unwrap_or_default().to_string();
        let side_raw = msg.get(tags::SIDE).unwrap_or_default().to_string();
        let qty_raw = msg.get(tags::ORDER_QTY).unwrap_or_default().to_string();

        let reject = |session: &Self, err: ValidationError| {
            session.reject_report(gateway, &cl_ord_id, &symbol, &side_raw, &qty_raw, &err)
        };

        if cl_ord_id.is_empty() {
            out.push(reject(self, ValidationError::MissingField(tags::CL_ORD_ID)));
            return;
        }
        if self.client_orders.contains_key(&cl_ord_id) {
            out.push(reject(
                self,
                ValidationError::DuplicateClOrdId(cl_ord_id.clone()),
            ));
            return;
        }
        if symbol.is_empty() {
            out.push(reject(self, ValidationError::MissingField(tags::SYMBOL)));
            return;
        }

        let side = match msg.get(tags::SIDE) {
            None => {
                out.push(reject(self, ValidationError::MissingField(tags::SIDE)));
                return;
            }
            Some(raw) => match Side::from_fix(raw) {
                Some(side) => side,
                None => {
                    // A known message type carrying an unknown code is a
                    // protocol error, not a business reject.
                    out.push(self.session_reject(
                        msg.seq_num(),
                        &format!("invalid value in tag 54: {raw}"),
                    ));
                    return;
                }
            },
        };

        let kind = match msg.get(tags::ORD_TYPE) {
            None => {
                out.push(reject(self, ValidationError::MissingField(tags::ORD_TYPE)));
                return;
            }
            Some(raw) => match OrdKind::from_fix(raw) {
                Some(kind) => kind,
                None => {
                    out.push(self.session_reject(
                        msg.seq_num(),
                        &format!("invalid value in tag 40: {raw}"),
                    ));
                    return;
                }
            },
        };

        let qty: u64 = match msg.get(tags::ORDER_QTY) {
            None => {
                out.push(reject(self, ValidationError::MissingField(tags::ORDER_QTY)));
                return;
            }
            Some(raw) => match raw.parse() {
                Ok(qty) => qty,
                Err(_) => {
                    out.push(reject(
                        self,
                        ValidationError::InvalidQuantity(raw.to_string()),
                    ));
                    return;
                }
            },
        };

        let price = match msg.get(tags::PRICE) {
            None => None,
            Some(raw) => match Decimal::from_str(raw) {
                Ok(px) => Some(px),
                Err(_) => {
                    out.push(reject(self, ValidationError::InvalidPrice(raw.to_string())));
                    return;
                }
            },
        };

        let request = NewOrderRequest {
            client_order_id: cl_ord_id.clone(),
            symbol: symbol.clone(),
            side,
            kind,
            qty,
            price,
        };

        let outcome = match gateway.engine.submit(request) {
            Ok(outcome) => outcome,
            Err(err) => {
                info!(peer = %self.peer, %cl_ord_id, %err, "order rejected");
                out.push(reject(self, err));
                return;
            }
        };

        self.client_orders.insert(
            cl_ord_id.clone(),
            OrderRef {
                order_id: outcome.accepted.order_id,
                symbol: symbol.clone(),
            },
        );
        self.owned_ids.insert(outcome.accepted.order_id);
        gateway
            .router
            .register(outcome.accepted.order_id, self.reply_tx.clone());

        gateway.persist_order(&outcome.order);
        gateway.bus.publish(ExchangeEvent::NewOrder {
            order: outcome.accepted.clone(),
        });

        // Acknowledge the order as New before any fill reports.
        out.push(self.execution_report(gateway, &outcome.accepted, '0', '0', 0, None));

        for m in &outcome.matches {
            gateway.persist_order(&m.buy);
            gateway.persist_order(&m.sell);
            gateway.persist_execution(&m.execution);
            gateway.bus.publish(ExchangeEvent::Execution {
                execution: m.execution.clone(),
                order_states: vec![m.buy.clone(), m.sell.clone()],
            });

            for order in [&m.buy, &m.sell] {
                let code = if order.status == OrderStatus::Filled {
                    '2'
                } else {
                    '1'
                };
                let report = self.execution_report(
                    gateway,
                    order,
                    code,
                    code,
                    m.execution.last_qty,
                    Some(m.execution.last_px),
                );
                self.deliver(order.order_id, report, gateway, out);
            }
        }

        // Market residual: one final report reflecting the cancel.
        if outcome.order.kind == OrdKind::Market && outcome.order.status == OrderStatus::Canceled {
            gateway.persist_order(&outcome.order);
            gateway.bus.publish(ExchangeEvent::CancelOrder {
                order_id: outcome.order.order_id,
                status: OrderStatus::Canceled,
            });
            out.push(self.execution_report(gateway, &outcome.order, '4', '4', 0, None));
        }
    }

    fn handle_cancel(
        &mut self,
        msg: &FixMessage,
        gateway: &Gateway,
        out: &mut Vec<OutboundMessage>,
    ) {
        let Some((order_id, symbol)) = self.resolve_cancel_target(msg) else {
            out.push(self.cancel_reject(msg, "Order not found"));
            return;
        };

        match gateway.engine.cancel(&symbol, order_id) {
            CancelOutcome::Canceled(order) => {
                gateway.persist_order(&order);
                gateway.bus.publish(ExchangeEvent::CancelOrder {
                    order_id,
                    status: OrderStatus::Canceled,
                });
                gateway.router.unregister(order_id);
                info!(peer = %self.peer, order = %order_id, "order canceled");
                out.push(self.execution_report(gateway, &order, '4', '4', 0, None));
            }
            CancelOutcome::NotFound => {
                out.push(self.cancel_reject(msg, "Order not found"));
            }
        }
    }

    /// Find the order a cancel request points at: tag 37 when present,
    /// otherwise the original ClOrdID (41, falling back to 11) through
    /// this session's order map.
    fn resolve_cancel_target(&self, msg: &FixMessage) -> Option<(OrderId, String)> {
        if let Some(raw) = msg.get(tags::ORDER_ID) {
            let order_id = raw.parse::<OrderId>().ok()?;
            if let Some(symbol) = msg.get(tags::SYMBOL) {
                return Some((order_id, symbol.to_string()));
            }
            return self
                .client_orders
                .values()
                .find(|r| r.order_id == order_id)
                .map(|r| (order_id, r.symbol.clone()));
        }

        let key = msg
            .get(tags::ORIG_CL_ORD_ID)
            .or_else(|| msg.get(tags::CL_ORD_ID))?;
        self.client_orders
            .get(key)
            .map(|r| (r.order_id, r.symbol.clone()))
    }

    /// Hand a report to whoever owns the order: our own socket, or a
    /// peer session through the router.
    fn deliver(
        &self,
        order_id: OrderId,
        report: OutboundMessage,
        gateway: &Gateway,
        out: &mut Vec<OutboundMessage>,
    ) {
        if self.owned_ids.contains(&order_id) {
            out.push(report);
        } else {
            gateway.router.route(order_id, report);
        }
    }

    fn execution_report(
        &self,
        gateway: &Gateway,
        order: &Order,
        exec_type: char,
        ord_status: char,
        last_qty: u64,
        last_px: Option<Price>,
    ) -> OutboundMessage {
        OutboundMessage::new(MsgType::ExecutionReport)
            .field(tags::ORDER_ID, order.order_id.to_string())
            .field(tags::CL_ORD_ID, order.client_order_id.clone())
            .field(tags::EXEC_ID, gateway.engine.mint_exec_id().to_string())
            .field(tags::EXEC_TYPE, exec_type.to_string())
            .field(tags::ORD_STATUS, ord_status.to_string())
            .field(tags::SYMBOL, order.symbol.clone())
            .field(tags::SIDE, order.side.as_fix().to_string())
            .field(tags::ORDER_QTY, order.qty.to_string())
            .field(tags::LAST_QTY, last_qty.to_string())
            .field(tags::LAST_PX, px_string(last_px))
            .field(tags::CUM_QTY, order.filled_qty.to_string())
            .field(tags::AVG_PX, avg_string(order))
            .field(tags::TRANSACT_TIME, timestamp::now_utc())
    }

    fn reject_report(
        &self,
        gateway: &Gateway,
        cl_ord_id: &str,
        symbol: &str,
        side_raw: &str,
        qty_raw: &str,
        err: &ValidationError,
    ) -> OutboundMessage {
        OutboundMessage::new(MsgType::ExecutionReport)
            .field(tags::ORDER_ID, gateway.engine.mint_order_id().to_string())
            .field(tags::CL_ORD_ID, cl_ord_id)
            .field(tags::EXEC_ID, gateway.engine.mint_exec_id().to_string())
            .field(tags::EXEC_TYPE, "8")
            .field(tags::ORD_STATUS, "8")
            .field(tags::SYMBOL, symbol)
            .field(tags::SIDE, side_raw)
            .field(tags::ORDER_QTY, qty_raw)
            .field(tags::LAST_QTY, "0")
            .field(tags::LAST_PX, "0.00")
            .field(tags::CUM_QTY, "0")
            .field(tags::AVG_PX, "0.00")
            .field(tags::TEXT, err.to_string())
            .field(tags::TRANSACT_TIME, timestamp::now_utc())
    }

    fn cancel_reject(&self, msg: &FixMessage, text: &str) -> OutboundMessage {
        OutboundMessage::new(MsgType::OrderCancelReject)
            .field(
                tags::ORDER_ID,
                msg.get(tags::ORDER_ID).unwrap_or("NONE").to_string(),
            )
            .field(
                tags::CL_ORD_ID,
                msg.get(tags::CL_ORD_ID).unwrap_or_default().to_string(),
            )
            .field(tags::ORD_STATUS, "8")
            .field(tags::CXL_REJ_REASON, CXL_REJ_UNKNOWN_ORDER)
            .field(tags::TEXT, text)
    }

    fn session_reject(&self, ref_seq: Option<u64>, text: &str) -> OutboundMessage {
        let mut reject = OutboundMessage::new(MsgType::SessionReject);
        if let Some(seq) = ref_seq {
            reject = reject.field(tags::REF_SEQ_NUM, seq.to_string());
        }
        reject.field(tags::TEXT, text)
    }
}

fn px_string(px: Option<Price>) -> String {
    px.map(|p| p.to_string()).unwrap_or_else(|| "0.00".to_string())
}

fn avg_string(order: &Order) -> String {
    if order.filled_qty == 0 {
        "0.00".to_string()
    } else {
        let mut avg = order.avg_px().round_dp(2);
        avg.rescale(2);
        avg.to_string()
    }
}
