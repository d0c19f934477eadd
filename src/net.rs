pub mod http {
    use std::{net::TcpListener, path::PathBuf, sync::Arc, thread};

    use axum::{
        body::Bytes,
        extract::{DefaultBodyLimit, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
        Json, Router,
    };
    use log::{error, info};
    use serde_json::{json, Value};

    use crate::{
        payload::InferencePayload,
        predictions::{decode_labels, LabelTable},
        slot::FrameSlot,
    };

    pub const DEFAULT_PORT: u16 = 5000;
    const BODY_LIMIT: usize = 16 * 1024 * 1024;

    #[derive(Clone)]
    pub struct ReceiverState {
        pub slot: Arc<FrameSlot>,
        /// Read again on every request.
        pub labels: PathBuf,
    }

    pub fn router(state: ReceiverState) -> Router {
        Router::new()
            .route("/", get(index).post(show_image))
            .layer(DefaultBodyLimit::max(BODY_LIMIT))
            .with_state(state)
    }

    pub fn bind(port: u16) -> anyhow::Result<TcpListener> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    /// Serves `router` on its own thread with a private tokio runtime, leaving
    /// the calling thread free for the window.
    pub fn spawn_server(
        listener: TcpListener,
        state: ReceiverState,
    ) -> anyhow::Result<thread::JoinHandle<anyhow::Result<()>>> {
        let addr = listener.local_addr()?;
        let handle = thread::Builder::new()
            .name("http".into())
            .spawn(move || {
                let result = serve(listener, state);
                if let Err(e) = &result {
                    error!("HTTP server on {} stopped: {:#}", addr, e);
                }
                result
            })?;
        Ok(handle)
    }

    fn serve(listener: TcpListener, state: ReceiverState) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener)?;
            info!("Listening on http://{}", listener.local_addr()?);
            axum::serve(listener, router(state)).await?;
            Ok::<(), anyhow::Error>(())
        })
    }

    async fn index() -> Json<Value> {
        Json(json!({
            "name": "FluentBit",
            "email": "FluentBit@fluentbit",
        }))
    }

    async fn show_image(
        State(state): State<ReceiverState>,
        body: Bytes,
    ) -> Result<Json<Value>, HandlerError> {
        let payload = InferencePayload::from_msgpack(&body)?;
        println!("{}", serde_json::to_string_pretty(&payload.output)?);

        let labels = LabelTable::from_slice(&tokio::fs::read(&state.labels).await?)?;
        let names = decode_labels(&payload.output, &labels)?;
        println!("{}", names.join(" "));

        state.slot.put(payload.frame);
        Ok(Json(json!({})))
    }

    /// Any failure while handling a request; the request gets a 500, the
    /// server keeps going.
    pub struct HandlerError(anyhow::Error);

    impl<E: Into<anyhow::Error>> From<E> for HandlerError {
        fn from(err: E) -> Self {
            HandlerError(err.into())
        }
    }

    impl IntoResponse for HandlerError {
        fn into_response(self) -> Response {
            error!("request failed: {:#}", self.0);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", self.0)).into_response()
        }
    }
}

pub mod mqtt {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            mpsc, Arc,
        },
        thread,
        time::Duration,
    };

    use log::{debug, error, info, warn};
    use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS};

    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 1883;
    pub const DEFAULT_CLIENT_ID: &str = "flb_client";
    pub const DEFAULT_TOPIC: &str = "fluentbit/flb_tensorflow";

    const REQUEST_CAPACITY: usize = 10;
    const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

    pub trait Publish {
        fn publish(&mut self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()>;
    }

    /// Broker client plus the thread driving its connection.
    pub struct MqttLink {
        client: Client,
        connected: Arc<AtomicBool>,
        done: mpsc::Receiver<()>,
    }

    /// Starts connecting in the background. Nothing is retried: a refused or
    /// failed connection is logged and the link never reports connected.
    pub fn connect(client_id: &str, host: &str, port: u16) -> anyhow::Result<MqttLink> {
        let options = MqttOptions::new(client_id, host, port);
        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);

        let connected = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = mpsc::channel();
        let flag = connected.clone();
        thread::Builder::new().name("mqtt".into()).spawn(move || {
            drive(&mut connection, &flag);
            let _ = done_tx.send(());
        })?;

        Ok(MqttLink {
            client,
            connected,
            done,
        })
    }

    fn drive(connection: &mut Connection, connected: &AtomicBool) {
        for notification in connection.iter() {
            match notification {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if matches!(ack.code, ConnectReturnCode::Success) {
                        info!("Connected to broker");
                        connected.store(true, Ordering::SeqCst);
                    } else {
                        error!("Connection failed: {:?}", ack.code);
                        return;
                    }
                }
                Ok(event) => debug!("{:?}", event),
                Err(e) => {
                    if connected.load(Ordering::SeqCst) {
                        warn!("Broker connection closed: {}", e);
                    } else {
                        error!("Connection failed: {}", e);
                    }
                    return;
                }
            }
        }
    }

    impl MqttLink {
        pub fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        /// Blocks until the broker accepts the connection. There is no
        /// timeout.
        pub fn wait_connected(&self, poll: Duration) {
            while !self.is_connected() {
                thread::sleep(poll);
            }
        }

        /// Disconnects and gives queued publishes a moment to go out.
        pub fn shutdown(self) -> anyhow::Result<()> {
            let MqttLink { client, done, .. } = self;
            client.disconnect()?;
            drop(client);
            if done.recv_timeout(FLUSH_TIMEOUT).is_err() {
                warn!("Broker connection still open after {:?}", FLUSH_TIMEOUT);
            }
            Ok(())
        }
    }

    impl Publish for MqttLink {
        fn publish(&mut self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
            self.client.publish(topic, QoS::AtMostOnce, false, payload)?;
            Ok(())
        }
    }

}
