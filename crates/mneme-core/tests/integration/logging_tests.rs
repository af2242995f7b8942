//! Log output of HarvestService, independent of the progress reporter.

use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

use crate::integration::common::{MemoryLedgerStore, MemorySink, MockTimelineClient, handle};
use mneme_core::{HarvestService, ProgressLedger, TransportErrorKind};

/// Collects formatted log lines in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[tokio::test]
async fn test_run_logs_progress_and_failures_without_reporter() {
    // Arrange
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let client = MockTimelineClient::new()
        .with_timeline(handle("a"), 1..=5)
        .with_failure(handle("b"), TransportErrorKind::ServerError, "over capacity");
    let mut ledger = ProgressLedger::load(MemoryLedgerStore::new()).await.unwrap();
    let service = HarvestService::new(client, MemorySink::new());

    // Act: `run` passes the silent reporter.
    service
        .run(&BTreeSet::from([handle("a"), handle("b")]), &mut ledger)
        .await
        .unwrap();

    // Assert
    let lines = logs.lines();
    let has = |level: &str, needle: &str| {
        lines
            .iter()
            .any(|line| line.contains(level) && line.contains(needle))
    };

    assert!(has("INFO", "Harvest started"), "{lines:#?}");
    assert!(has("INFO", "Harvest completed"), "{lines:#?}");
    assert!(has("INFO", "Identity harvested"), "{lines:#?}");

    let failures: Vec<&String> = lines.iter().filter(|l| l.contains("ERROR")).collect();
    assert_eq!(failures.len(), 1, "{lines:#?}");
    assert!(failures[0].contains("identity=@b"));
    assert!(failures[0].contains("over capacity"));
}
