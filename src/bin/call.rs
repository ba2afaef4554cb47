use anyhow::{Context, Result};
use futures::StreamExt;
use prost::Message;
use rpcmux_lite::{RpcClient, RpcClientConfig, event};
use rpcmux_prototype::{TonicTransport, TransportConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CHECK_METHOD: &str = "grpc.health.v1.Health/Check";
const WATCH_METHOD: &str = "grpc.health.v1.Health/Watch";

#[derive(Clone, PartialEq, Message)]
struct HealthCheckRequest {
    #[prost(string, tag = "1")]
    service: String,
}

#[derive(Clone, PartialEq, Message)]
struct HealthCheckResponse {
    #[prost(int32, tag = "1")]
    status: i32,
}

fn status_name(status: i32) -> &'static str {
    match status {
        0 => "UNKNOWN",
        1 => "SERVING",
        2 => "NOT_SERVING",
        3 => "SERVICE_UNKNOWN",
        _ => "INVALID",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rpcmux_lite=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TransportConfig::from_env().context("reading GRPC_* settings")?;
    let watch = std::env::var("GRPC_WATCH").is_ok();
    let method = std::env::var("GRPC_METHOD").unwrap_or_else(|_| {
        if watch { WATCH_METHOD } else { CHECK_METHOD }.to_string()
    });
    let service = std::env::var("GRPC_SERVICE").unwrap_or_default();

    println!("Calling {method} on {}", config.uri());

    let (events, feed) = event::channel();
    let transport = TonicTransport::new(config, events)?;
    let client = RpcClient::new(transport, RpcClientConfig::new());
    client.spawn_router(feed);

    let payload = HealthCheckRequest { service }.encode_to_vec();

    if watch {
        let call = client.invoke_server_streaming(method, payload.into(), None)?;
        let mut messages = call
            .messages()
            .context("message stream already taken")?;

        println!("Headers: {:?}", call.headers().await?);
        while let Some(message) = messages.next().await {
            let response = HealthCheckResponse::decode(message?)?;
            println!("Status: {}", status_name(response.status));
        }
        println!("Trailers: {:?}", call.await?);
    } else {
        let call = client.invoke_unary(method, payload.into(), None)?;

        println!("Headers: {:?}", call.headers().await?);
        let response = HealthCheckResponse::decode(call.response().await?)?;
        println!("Status: {}", status_name(response.status));
        println!("Trailers: {:?}", call.trailers().await?);
    }

    client.shutdown();
    Ok(())
}
