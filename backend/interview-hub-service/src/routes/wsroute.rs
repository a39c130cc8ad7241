use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::config::WsConfig;
use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::{Delivery, Interaction, MessageAction, OutboundMessage, TimeRange};
use crate::services::BroadcastRouter;
use crate::state::AppState;
use crate::websocket::message_types::{WsInboundEvent, WsOutboundFrame};
use crate::websocket::ConnectionId;

// Reply produced by a spawned router call
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextFrame(String);

// WebSocket Actor
struct WsSession {
    session_id: Uuid,
    participant_id: Uuid,
    connection_id: ConnectionId,
    router: Arc<BroadcastRouter>,
    ws: WsConfig,
    hb: Instant,
    // Taken in `started`, sent before any live delivery.
    history: Option<Vec<Interaction>>,
    // Highest sequence number in the snapshot; live CREATEs at or below it
    // are already known to the client.
    history_high: i64,
    receiver: Option<UnboundedReceiverStream<Delivery>>,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = self.ws.heartbeat_interval;
        let timeout = self.ws.client_timeout;
        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(
                    "WebSocket heartbeat failed for participant {}, disconnecting",
                    act.participant_id
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn handle_inbound(&self, evt: WsInboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let router = self.router.clone();
        let session_id = self.session_id;
        let participant_id = self.participant_id;
        let addr = ctx.address();

        actix::spawn(async move {
            if let Some(frame) = dispatch(&router, session_id, participant_id, evt).await {
                addr.do_send(TextFrame(frame.to_json()));
            }
        });
    }
}

/// Whether a live delivery is already part of the history snapshot sent on
/// connect.
fn covered_by_snapshot(session_id: Uuid, history_high: i64, delivery: &Delivery) -> bool {
    match delivery.message.as_ref() {
        OutboundMessage::Interaction(m) => {
            m.action == MessageAction::Create
                && m.session_id == session_id
                && m.sequence_number.is_some_and(|seq| seq <= history_high)
        }
        OutboundMessage::SessionEvent(_) => false,
    }
}

/// Run one inbound frame against the router. Returns the reply for the
/// sending socket, if the frame produces one.
async fn dispatch(
    router: &BroadcastRouter,
    session_id: Uuid,
    participant_id: Uuid,
    evt: WsInboundEvent,
) -> Option<WsOutboundFrame> {
    match evt {
        WsInboundEvent::Typing { is_typing } => router
            .handle_typing(session_id, participant_id, is_typing)
            .await
            .err()
            .map(|e| WsOutboundFrame::error(&e)),
        WsInboundEvent::DeleteInteraction { interaction_id } => router
            .delete_interaction(interaction_id, participant_id)
            .await
            .err()
            .map(|e| WsOutboundFrame::error(&e)),
        WsInboundEvent::Interaction(body) => Some(
            match router
                .submit_from_client(session_id, participant_id, body)
                .await
            {
                Ok(interaction) => WsOutboundFrame::accepted(&interaction),
                Err(e) => WsOutboundFrame::error(&e),
            },
        ),
    }
}

/// Drop a closed connection. The participant leaves the session once its
/// last connection for that session is gone.
///
/// Returns true when the leave was triggered.
async fn leave_on_close(
    router: &BroadcastRouter,
    session_id: Uuid,
    participant_id: Uuid,
    connection_id: ConnectionId,
) -> bool {
    if !router.registry().detach(participant_id, connection_id) {
        return false;
    }
    if let Err(e) = router
        .handle_participant_left(session_id, participant_id)
        .await
    {
        tracing::warn!(
            session_id = %session_id,
            participant_id = %participant_id,
            error = %e,
            "failed to leave session on close"
        );
    }
    true
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            "WebSocket session started for participant {} in session {}",
            self.participant_id,
            self.session_id
        );

        self.hb(ctx);

        if let Some(interactions) = self.history.take() {
            let frame = WsOutboundFrame::History {
                session_id: self.session_id,
                interactions,
            };
            ctx.text(frame.to_json());
        }
        if let Some(receiver) = self.receiver.take() {
            ctx.add_stream(receiver);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            "WebSocket session stopped for participant {} in session {}",
            self.participant_id,
            self.session_id
        );

        let router = self.router.clone();
        let session_id = self.session_id;
        let participant_id = self.participant_id;
        let connection_id = self.connection_id;
        actix::spawn(async move {
            leave_on_close(&router, session_id, participant_id, connection_id).await;
        });
    }
}

impl Handler<TextFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: TextFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

// Deliveries from the registry
impl StreamHandler<Delivery> for WsSession {
    fn handle(&mut self, delivery: Delivery, ctx: &mut Self::Context) {
        if covered_by_snapshot(self.session_id, self.history_high, &delivery) {
            return;
        }
        match delivery.to_json() {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::warn!(
                error = %e,
                "Failed to serialize delivery on {}",
                delivery.topic
            ),
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        tracing::debug!(
            "Delivery stream closed for participant {}",
            self.participant_id
        );
        ctx.stop();
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<WsInboundEvent>(&text) {
                    Ok(evt) => self.handle_inbound(evt, ctx),
                    Err(e) => {
                        tracing::warn!("Failed to parse WS message: {:?}", e);
                        let err = AppError::Validation(format!("malformed frame: {e}"));
                        ctx.text(WsOutboundFrame::error(&err).to_json());
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("WebSocket close message received: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket protocol error: {:?}", e);
                ctx.stop();
            }
        }
    }
}

/// Join a session over WebSocket
///
/// The connection is attached before the join so lifecycle events queued
/// while offline, and everything published from here on, reach it.
///
/// **Endpoint**: `GET /ws/sessions/:id?user_id=`
#[get("/ws/sessions/{session_id}")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    user: User,
    session_id: web::Path<Uuid>,
) -> Result<HttpResponse, Error> {
    let session_id = session_id.into_inner();
    let participant_id = user.id;
    let router = state.router.clone();

    let (connection_id, rx) = router.registry().attach(participant_id, session_id);

    let joined = async {
        router
            .handle_participant_joined(session_id, participant_id)
            .await?;
        router
            .get_session_interactions(session_id, TimeRange::default())
            .await
    }
    .await;

    let history = match joined {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(
                session_id = %session_id,
                participant_id = %participant_id,
                error = %e,
                "WebSocket connection rejected"
            );
            leave_on_close(&router, session_id, participant_id, connection_id).await;
            return Err(e.into());
        }
    };
    let history_high = history
        .iter()
        .map(|i| i.sequence_number)
        .max()
        .unwrap_or(0);

    let session = WsSession {
        session_id,
        participant_id,
        connection_id,
        router: router.clone(),
        ws: state.config.ws.clone(),
        hb: Instant::now(),
        history: Some(history),
        history_high,
        receiver: Some(UnboundedReceiverStream::new(rx)),
    };

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            // Handshake failed: the actor never ran, so undo the join here.
            leave_on_close(&router, session_id, participant_id, connection_id).await;
            Err(e)
        }
    }
}
