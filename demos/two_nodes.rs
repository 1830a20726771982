//! Two nodes on one bus - request/response example.
//!
//! This example demonstrates:
//! - Wiring two transceivers to an in-memory bus
//! - A master that polls a slave with a request every 100 ms
//! - A slave that answers from inside its receive handler with its button
//!   status, MsgPack-encoded
//!
//! ```text
//! cargo run --example two_nodes
//! RUST_LOG=homebus=debug cargo run --example two_nodes
//! ```

use std::time::Duration;

use homebus::codec::MsgPackCodec;
use homebus::handler::QueueHandler;
use homebus::protocol::MAX_DATA_LEN;
use homebus::transceiver::{SharedBus, Transceiver};
use homebus::{Endpoint, EndpointConfig, RxFilter};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const MASTER_ADDRESS: u8 = 0x10;
const SLAVE_ADDRESS: u8 = 0x00;

const OP_GET_STATUS: u8 = 42;
const OP_STATUS: u8 = 90;

const ROUNDS: usize = 5;

/// Payload of an `OP_STATUS` response.
#[derive(Serialize, Deserialize, Debug)]
struct ButtonStatus {
    pressed: bool,
    presses: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();

    let bus = SharedBus::new();
    let master_io = Transceiver::init(bus.attach()?, 128)?;
    let slave_io = Transceiver::init(bus.attach()?, 128)?;
    let master_rx = master_io.rx_queue();
    let slave_rx = slave_io.rx_queue();

    let config = EndpointConfig::default()
        .with_filter(RxFilter::AddressedToSelf)
        .with_idle_timeout(Duration::from_millis(50));

    let (responses, mut status_rx) = QueueHandler::channel(8);
    let mut master = Endpoint::builder()
        .self_address(MASTER_ADDRESS)
        .config(config.clone())
        .tx_sink(master_io)
        .rx_handler(responses)
        .build()?;

    // Simulated button: every other poll finds it pressed.
    let mut presses = 0u32;
    let mut slave = Endpoint::builder()
        .self_address(SLAVE_ADDRESS)
        .config(config)
        .tx_sink(slave_io)
        .on_packet(move |packet, ctx| {
            if packet.op_code() != OP_GET_STATUS {
                return Ok(());
            }
            presses += 1;
            let status = ButtonStatus {
                pressed: presses % 2 == 0,
                presses,
            };
            let payload = MsgPackCodec::encode_bounded(&status, MAX_DATA_LEN)?;
            ctx.reply(OP_STATUS, &payload)
        })
        .build()?;

    let slave_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(10));
        loop {
            tick.tick().await;
            if let Err(e) = slave.drain(&slave_rx) {
                tracing::warn!("Slave receive error: {}", e);
            }
            slave.check_idle(std::time::Instant::now());
            if slave.stats().frames_sent as usize >= ROUNDS {
                return slave.stats();
            }
        }
    });

    for round in 1..=ROUNDS {
        master.send_to(SLAVE_ADDRESS, OP_GET_STATUS, &[])?;
        tokio::time::sleep(Duration::from_millis(100)).await;

        if let Err(e) = master.drain(&master_rx) {
            tracing::warn!("Master receive error: {}", e);
        }
        while let Ok(packet) = status_rx.try_recv() {
            let status: ButtonStatus = packet.decode()?;
            tracing::info!(
                "Round {}: slave {:#04x} button {} ({} polls)",
                round,
                packet.source,
                if status.pressed { "pressed" } else { "released" },
                status.presses
            );
        }
    }

    let slave_stats = slave_task.await?;
    tracing::info!("Master stats: {}", serde_json::to_string(&master.stats())?);
    tracing::info!("Slave stats: {}", serde_json::to_string(&slave_stats)?);
    tracing::info!("{} bytes crossed the bus", bus.bytes_written());

    Ok(())
}
