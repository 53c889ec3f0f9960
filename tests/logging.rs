//! Subscriber installation tests. Kept in their own binary because they set
//! the process-wide default subscriber.

use prologix_gpib::logging::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let pretty = TracingConfig::new(Level::DEBUG)
        .with_format(OutputFormat::Pretty)
        .with_span_events(true)
        .with_file_and_line(true)
        .with_ansi(false);
    assert!(logging::init(pretty).is_ok());

    // Later calls build their layer and find the subscriber already set
    assert!(logging::init(TracingConfig::default()).is_ok());
    assert!(logging::init(TracingConfig::default().with_format(OutputFormat::Json)).is_ok());

    let span = tracing::info_span!("session", host = "127.0.0.1");
    let _entered = span.enter();
    tracing::info!("still logging after repeated init");
}
