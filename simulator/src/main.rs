mod reading;

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use reading::Reading;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "simulator", about = "Publishes synthetic meter readings over MQTT")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Target publish rate in readings per second
    #[arg(long, env = "RATE", default_value_t = 1000)]
    rate: u64,

    /// Number of simulated meters
    #[arg(long, env = "DEVICES", default_value_t = 100)]
    devices: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("Starting meter simulator");
    info!(
        "Broker: {}:{}, Rate: {} msg/s, Meters: {}",
        args.broker, args.port, args.rate, args.devices
    );

    let client_id = format!("sim-{}", uuid::Uuid::new_v4());

    // Connect to MQTT broker
    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    // Spawn eventloop handler
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT eventloop error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Connected to MQTT broker, starting to publish readings");

    let mut rng = rand::thread_rng();
    let mut counter = 0u64;

    const BURST_SIZE: usize = 200;
    let burst_interval = Duration::from_millis((BURST_SIZE as u64 * 1000) / args.rate);

    info!(
        "Publishing in bursts of {} messages every {:?}",
        BURST_SIZE, burst_interval
    );

    loop {
        let burst_start = std::time::Instant::now();

        for _ in 0..BURST_SIZE {
            let device_id = format!("meter-{}", counter % args.devices as u64);
            let reading = generate_reading(&mut rng, device_id);

            let topic = format!("meters/{}", reading.device_id);
            let payload = match serde_json::to_string(&reading) {
                Ok(p) => p,
                Err(e) => {
                    error!("Failed to serialize reading: {}", e);
                    continue;
                }
            };

            match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                Ok(_) => {
                    counter += 1;
                }
                Err(e) => {
                    warn!("Failed to publish: {}", e);
                }
            }
        }

        // Log progress periodically
        if counter % 10000 == 0 {
            info!("Published {} readings", counter);
        }

        let elapsed = burst_start.elapsed();
        if elapsed < burst_interval {
            tokio::time::sleep(burst_interval - elapsed).await;
        } else if elapsed > burst_interval * 2 {
            warn!(
                "Burst took {:?}, target was {:?} - system may be overloaded",
                elapsed, burst_interval
            );
        }
    }
}

fn generate_reading(rng: &mut impl Rng, device_id: String) -> Reading {
    let voltage = if rng.gen_bool(0.05) {
        rng.gen_range(180.0..260.0) // 5% sag/swell outliers
    } else {
        rng.gen_range(225.0..235.0) // Nominal mains
    };

    let current = if rng.gen_bool(0.2) {
        rng.gen_range(5.0..16.0) // Appliance under load
    } else {
        rng.gen_range(0.1..2.0) // Standby draw
    };

    let power_factor = rng.gen_range(0.85..1.0);

    Reading {
        device_id,
        timestamp: Utc::now(),
        voltage,
        current,
        power: voltage * current * power_factor,
    }
}
