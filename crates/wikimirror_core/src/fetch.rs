use std::fs;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};

use crate::client::WikiApi;
use crate::metadata::{DOWNLOAD_URL_FIELD, decode_timestamp, load_updated_at, save_metadata};
use crate::mirror::{MirrorLayout, validate_file_name, write_text};
use crate::names::to_remote;

/// Enforces a minimum spacing between successive remote page fetches.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchLog {
    pub failures: Vec<String>,
    pub attachment_failures: Vec<String>,
    pub attachments_saved: usize,
}

pub struct PageFetcher<'a, A: WikiApi> {
    api: &'a mut A,
    layout: &'a MirrorLayout,
    throttle: Throttle,
    abort_on_attachment_error: bool,
    log: FetchLog,
}

impl<'a, A: WikiApi> PageFetcher<'a, A> {
    pub fn new(
        api: &'a mut A,
        layout: &'a MirrorLayout,
        throttle: Duration,
        abort_on_attachment_error: bool,
    ) -> Self {
        Self {
            api,
            layout,
            throttle: Throttle::new(throttle),
            abort_on_attachment_error,
            log: FetchLog::default(),
        }
    }

    pub fn log(&self) -> &FetchLog {
        &self.log
    }

    pub fn request_count(&self) -> usize {
        self.api.request_count()
    }

    pub fn into_log(self) -> FetchLog {
        self.log
    }

    /// Download one page into the mirror.
    ///
    /// Returns `Ok(true)` when the local copy was written. A page that cannot be fetched is
    /// logged and reported as unchanged. With `require_newer`, a page that already has a local
    /// content file or metadata document is only rewritten when the remote `updated_at` is
    /// strictly later than the stored one.
    pub fn fetch(&mut self, local_name: &str, require_newer: bool) -> Result<bool> {
        self.throttle.wait();

        if let Err(error) = validate_file_name(local_name) {
            log::warn!("****Failure downloading {local_name}: {error:#}");
            self.log.failures.push(format!("{local_name}: {error:#}"));
            return Ok(false);
        }

        let remote_name = to_remote(local_name);
        let record = match self.api.get_page(&remote_name) {
            Ok(record) => record,
            Err(error) => {
                log::warn!("****Failure downloading {local_name}: {error:#}");
                self.log.failures.push(format!("{local_name}: {error:#}"));
                return Ok(false);
            }
        };

        let metadata_path = self.layout.metadata_path(local_name);
        if require_newer && self.layout.has_record(local_name) {
            let local_updated = load_updated_at(&metadata_path)?;
            let local = decode_timestamp(local_updated.as_deref())?;
            let remote = decode_timestamp(record.updated_at.as_deref())?;
            if remote <= local {
                log::debug!("up to date: {local_name}");
                return Ok(false);
            }
        }

        log::info!("   Updating: '{local_name}'");
        if let Some(content) = &record.content {
            write_text(&self.layout.content_path(local_name), content)?;
        }
        if let Some(html) = &record.html {
            write_text(&self.layout.html_path(local_name), html)?;
        }
        save_metadata(&metadata_path, &record)?;

        self.fetch_attachments(local_name, &remote_name)?;
        Ok(true)
    }

    fn fetch_attachments(&mut self, local_name: &str, remote_name: &str) -> Result<()> {
        let files = match self.api.list_files(remote_name) {
            Ok(files) => files,
            Err(error) => return self.attachment_failure(local_name, "<file list>", error),
        };
        if files.is_empty() {
            return Ok(());
        }

        self.layout.ensure_attachment_dir(local_name)?;
        for file in files {
            match self.fetch_attachment(local_name, remote_name, &file) {
                Ok(()) => self.log.attachments_saved += 1,
                Err(error) => self.attachment_failure(local_name, &file, error)?,
            }
        }
        Ok(())
    }

    fn fetch_attachment(&mut self, local_name: &str, remote_name: &str, file: &str) -> Result<()> {
        let target = self.layout.attachment_path(local_name, file)?;
        let metadata_path = self.layout.attachment_metadata_path(local_name, file)?;

        // files.get_meta rather than files.get_one: it also works for large files
        let meta = self.api.get_file_meta(remote_name, file)?;
        save_metadata(&metadata_path, &meta)?;

        let url = meta
            .field_text(DOWNLOAD_URL_FIELD)
            .ok_or_else(|| anyhow!("no {DOWNLOAD_URL_FIELD} for {file}"))?;
        let bytes = self.api.download(&url)?;
        fs::write(&target, bytes).with_context(|| format!("failed to write {}", target.display()))
    }

    fn attachment_failure(
        &mut self,
        local_name: &str,
        file: &str,
        error: anyhow::Error,
    ) -> Result<()> {
        let error = error.context(format!("attachment {file} of {local_name}"));
        if self.abort_on_attachment_error {
            return Err(error);
        }
        log::warn!("****Failure downloading {error:#}");
        self.log.attachment_failures.push(format!("{error:#}"));
        Ok(())
    }
}
