//! `/ws/timer` upgrade.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;
use futures::StreamExt;

use crate::gateway::GatewayState;
use crate::notify::serve_timer;

pub async fn timer(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = socket.split();
        serve_timer(
            sender,
            receiver,
            state.lifecycle.clock(),
            state.timers.clone(),
        )
        .await;
    })
}
