//! Produces stdin lines to a Kafka topic and blocks until all are delivered.
//!
//! Each line is either `key<TAB>payload` or a bare payload. Configuration is
//! read from `spool.toml` and `SPOOL_` environment variables.
//!
//! ```text
//! printf 'user-1\tcreated\n' | spool-produce orders
//! ```

use std::{
    env,
    io::{self, BufRead},
    time::Instant,
};

use anyhow::{bail, Context, Result};
use spool_core::{kafka::KafkaTransport, BufferError, BufferedProducer, ProducerConfig};
use tracing::{info, warn};

fn main() -> Result<()> {
    let Some(topic) = env::args().nth(1) else {
        bail!("usage: spool-produce <topic> < messages");
    };

    let config = ProducerConfig::load().context("failed to load configuration")?;
    init_tracing(&config.rust_log)?;

    info!(
        brokers = %config.brokers,
        topic = %topic,
        max_delivery_attempts = config.max_delivery_attempts,
        "configuration loaded"
    );

    let mut producer = BufferedProducer::<KafkaTransport>::from_config(&config)
        .context("failed to create producer")?;

    let mut buffered = 0usize;
    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.is_empty() {
            continue;
        }

        let builder = match line.split_once('\t') {
            Some((key, payload)) => producer
                .make_builder(topic.as_str())
                .key(key.to_owned())
                .payload(payload.to_owned()),
            None => producer.make_builder(topic.as_str()).payload(line),
        };
        producer.add_message(builder).with_context(|| format!("failed to buffer for {topic}"))?;
        buffered += 1;
    }

    let started = Instant::now();
    match producer.flush() {
        Ok(()) => {},
        Err(BufferError::RetriesExhausted { abandoned }) => {
            for message in producer.take_abandoned() {
                warn!(
                    token = %message.token,
                    attempts = message.attempts,
                    error = %message.last_error,
                    "message abandoned"
                );
            }
            bail!("{abandoned} of {buffered} message(s) could not be delivered");
        },
        Err(error) => return Err(error).context("flush failed"),
    }

    let stats = producer.stats();
    info!(
        delivered = stats.acknowledged,
        submissions = stats.submissions,
        delivery_failures = stats.delivery_failures,
        backpressure_events = stats.backpressure_events,
        duration_ms = started.elapsed().as_millis(),
        "all messages delivered"
    );
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` over the configured filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("invalid log filter")?;

    let fmt_layer = fmt::layer().with_target(true).with_writer(io::stderr);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}
