//! Local mirror of the HDFS layout.
//!
//! Records land as JSON lines under `<root>/<home-path>/`. A descriptor with
//! append support gets one file per day that later connections append to;
//! without it every connection starts a new part file, as HDFS requires.

use crate::connection::ConnectionDescriptor;
use crate::error::{PipelineError, PipelineResult, ResultExt};
use crate::record::EventRecord;
use crate::sink::HdfsWriter;
use chrono::Utc;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Component, Path, PathBuf};

const FILE_EXTENSION: &str = "jsonl";

/// Writes serialisable records as JSON lines on the local disk.
pub struct LocalFsWriter<T> {
    root: PathBuf,
    out: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    written: u64,
    _record: PhantomData<fn(&T)>,
}

impl<T> LocalFsWriter<T> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            out: None,
            path: None,
            written: 0,
            _record: PhantomData,
        }
    }

    /// File currently being written, once connected.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Records written since `connect`.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// `<root>/<home-path>`. A home path that would climb out of the root
    /// is refused.
    pub fn directory_for(&self, descriptor: &ConnectionDescriptor) -> PipelineResult<PathBuf> {
        let home = Path::new(descriptor.home_path().trim_start_matches('/'));
        let confined = home
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            return Err(PipelineError::Config(format!(
                "Home path {:?} escapes the mirror root",
                descriptor.home_path()
            )));
        }
        Ok(self.root.join(home))
    }
}

/// User names end up in file names; keep them to a single path segment.
fn file_safe(user: &str) -> String {
    user.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

fn open_daily(dir: &Path) -> std::io::Result<(PathBuf, File)> {
    let path = dir.join(format!(
        "events-{}.{}",
        Utc::now().format("%Y%m%d"),
        FILE_EXTENSION
    ));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

fn open_part(dir: &Path, user: &str) -> std::io::Result<(PathBuf, File)> {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
    let user = file_safe(user);
    let mut attempt = 0u32;
    loop {
        let name = if attempt == 0 {
            format!("part-{}-{}.{}", stamp, user, FILE_EXTENSION)
        } else {
            format!("part-{}-{}-{}.{}", stamp, user, attempt, FILE_EXTENSION)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

impl<T: EventRecord + Serialize> HdfsWriter<T> for LocalFsWriter<T> {
    fn connect(&mut self, descriptor: &ConnectionDescriptor) -> PipelineResult<()> {
        let dir = self.directory_for(descriptor)?;
        std::fs::create_dir_all(&dir)
            .map_err(PipelineError::from)
            .with_context(|| format!("Creating {:?}", dir))?;

        let opened = if descriptor.dfs_support_append() {
            open_daily(&dir)
        } else {
            open_part(&dir, descriptor.user())
        };
        let (path, file) = opened
            .map_err(PipelineError::from)
            .with_context(|| format!("Opening output file in {:?}", dir))?;

        tracing::info!("Mirroring {} into {:?}", descriptor.uri(), path);
        self.out = Some(BufWriter::new(file));
        self.path = Some(path);
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, record: &T) -> PipelineResult<()> {
        let Some(out) = self.out.as_mut() else {
            return Err(PipelineError::NotInitialized {
                stage: "local-fs".to_string(),
            });
        };
        serde_json::to_writer(&mut *out, record)?;
        out.write_all(b"\n")?;
        out.flush()?;
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) -> PipelineResult<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
            tracing::debug!("Closed {:?} after {} record(s)", self.path, self.written);
        }
        Ok(())
    }
}
