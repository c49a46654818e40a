//! Streaming between remote files and local readers or writers.

use crate::cache::MetadataCache;
use crate::remote::{OpenMode, Remote};
use crate::tasks::{Callback, Operation, Outcome};
use smbdoc_types::ResourceKey;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const BUFFER_SIZE: usize = 64 * 1024;

/// Copy `reader` into `writer` until EOF or cancellation.
///
/// Returns the number of bytes copied.
fn copy(reader: &mut impl Read, writer: &mut impl Write, cancel: &CancellationToken) -> Outcome<u64> {
    let mut buf = vec![0; BUFFER_SIZE];
    let mut total = 0;
    loop {
        if cancel.is_cancelled() {
            return Outcome::Cancelled(Some(total));
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Outcome::Failed(err.into()),
        };
        if let Err(err) = writer.write_all(&buf[..n]) {
            return Outcome::Failed(err.into());
        }
        total += n as u64;
    }
    if let Err(err) = writer.flush() {
        return Outcome::Failed(err.into());
    }

    Outcome::Succeeded(total)
}

fn log_outcome(key: &ResourceKey, what: &str, outcome: &Outcome<u64>) {
    match outcome {
        Outcome::Succeeded(n) => log::debug!("{key}: {what} {n} bytes"),
        Outcome::Failed(err) => log::warn!("{key}: {what} failed: {err}"),
        Outcome::Cancelled(n) => log::debug!("{key}: {what} cancelled after {n:?} bytes"),
    }
}

/// Stream a remote file into a local writer.
///
/// The callback, if any, gets the number of bytes copied or the
/// error.
pub(crate) struct ReadFileTask<W> {
    key: ResourceKey,
    remote: Remote,
    sink: W,
    callback: Option<Callback<u64>>,
}

impl<W> ReadFileTask<W> {
    pub(crate) fn new(
        key: ResourceKey,
        remote: Remote,
        sink: W,
        callback: Option<Callback<u64>>,
    ) -> Self {
        Self {
            key,
            remote,
            sink,
            callback,
        }
    }
}

impl<W: Write + Send + 'static> Operation for ReadFileTask<W> {
    type Output = u64;

    fn run(&mut self, cancel: &CancellationToken) -> Outcome<u64> {
        let mut file = match self.remote.open_file(&self.key, OpenMode::Read) {
            Ok(file) => file,
            Err(err) => return Outcome::Failed(err),
        };

        copy(&mut file, &mut self.sink, cancel)
    }

    fn finish(self, outcome: Outcome<u64>) {
        log_outcome(&self.key, "read", &outcome);
        if let Some(callback) = self.callback {
            callback(outcome.into_completion());
        }
    }
}

/// Stream a local reader into a remote file, replacing its content.
///
/// Once done, whatever the outcome, the cached entity is reset and
/// the parent is notified, as the remote file has likely changed.
pub(crate) struct WriteFileTask<R> {
    key: ResourceKey,
    remote: Remote,
    source: R,
    cache: Arc<MetadataCache>,
    tx: broadcast::Sender<ResourceKey>,
    callback: Option<Callback<u64>>,
}

impl<R> WriteFileTask<R> {
    pub(crate) fn new(
        key: ResourceKey,
        remote: Remote,
        source: R,
        cache: Arc<MetadataCache>,
        tx: broadcast::Sender<ResourceKey>,
        callback: Option<Callback<u64>>,
    ) -> Self {
        Self {
            key,
            remote,
            source,
            cache,
            tx,
            callback,
        }
    }
}

impl<R: Read + Send + 'static> Operation for WriteFileTask<R> {
    type Output = u64;

    fn run(&mut self, cancel: &CancellationToken) -> Outcome<u64> {
        let mut file = match self.remote.open_file(&self.key, OpenMode::Write) {
            Ok(file) => file,
            Err(err) => return Outcome::Failed(err),
        };

        copy(&mut self.source, &mut file, cancel)
    }

    fn merge(&mut self, _outcome: &Outcome<u64>) {
        if let Some(entity) = self.cache.get(&self.key).entity {
            entity.reset();
        }
    }

    fn finish(self, outcome: Outcome<u64>) {
        log_outcome(&self.key, "write", &outcome);
        if let Some(parent) = self.key.parent() {
            let _ = self.tx.send(parent);
        }
        if let Some(callback) = self.callback {
            callback(outcome.into_completion());
        }
    }
}
