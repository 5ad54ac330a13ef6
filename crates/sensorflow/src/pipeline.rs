//! One ingestion run: scan, group, match, reshape, load.
//!
//! Reshaping fans out over worker threads; the calling thread stays the only
//! writer and commits each (group, event) pair in its own transaction.

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::events::{EventMatcher, MatchedPair};
use crate::grouping::GroupBuilder;
use crate::reshape::{FileOutcome, ReshapeError, ReshapedGroup, Reshaper};
use crate::run_log::{RunLog, RunReport, SkipReason, Stage};
use crate::scout::{FileScanner, NamePatterns, ScanOutcome};
use crate::store::{LoadBatch, SensorStore};
use indicatif::ProgressBar;
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Instant;
use tracing::info;

/// Reshaped groups in flight per worker before workers block.
const CHANNEL_DEPTH_PER_WORKER: usize = 2;

/// Validate the config, open the store, and run once.
pub fn run(config: &IngestConfig) -> Result<RunReport> {
    Pipeline::new(config).run()
}

pub struct Pipeline<'a> {
    config: &'a IngestConfig,
    progress: ProgressBar,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a IngestConfig) -> Self {
        Self {
            config,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report per-pair progress on `progress`.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn run(&self) -> Result<RunReport> {
        self.config.validate()?;
        let store = SensorStore::open(&self.config.db_path)?;
        self.execute(&store)
    }

    /// Run against an already opened store.
    pub fn run_with_store(&self, store: &SensorStore) -> Result<RunReport> {
        self.config.validate()?;
        self.execute(store)
    }

    fn execute(&self, store: &SensorStore) -> Result<RunReport> {
        let started = Instant::now();
        let encoding = self.config.text_encoding()?;
        let patterns =
            NamePatterns::new(&self.config.name_patterns).map_err(IngestError::Config)?;
        let mut log = RunLog::new();

        let scanner = FileScanner::new(&self.config.target_folder, patterns);
        info!(
            root = %scanner.root().display(),
            label = self.config.label.as_deref().unwrap_or(""),
            events = self.config.events.len(),
            "Scanning for sensor files"
        );

        let mut builder = GroupBuilder::new();
        for outcome in scanner.scan() {
            match outcome {
                ScanOutcome::Found(meta) => {
                    log.summary.files_found += 1;
                    if let Err(unrecognized) = builder.add(meta) {
                        log.summary.files_unrecognized += 1;
                        log.skip(
                            Stage::Group,
                            unrecognized.source_file,
                            SkipReason::UnrecognizedName,
                            "file name does not follow a known convention",
                        );
                    }
                }
                ScanOutcome::Skipped(skip) => {
                    let reason = if skip.is_archive {
                        log.summary.archives_skipped += 1;
                        SkipReason::CorruptArchive
                    } else {
                        SkipReason::UnreadableFile
                    };
                    log.skip(Stage::Scan, skip.path, reason, skip.error.to_string());
                }
            }
        }

        let groups = builder.finish();
        log.summary.groups = groups.len() as u64;

        let processed = store.processed_index()?;
        let matched = EventMatcher::new(&self.config.events).match_groups(groups, &processed);
        log.summary.groups_without_event = matched.summary.groups_without_event;
        log.summary.groups_already_processed = matched.summary.groups_already_processed;
        log.summary.pairs_matched = matched.summary.pairs_matched;
        log.summary.pairs_already_processed = matched.summary.pairs_already_processed;
        for subject in &matched.already_processed {
            log.info(
                Stage::Match,
                subject.as_str(),
                "every member already processed for this event",
            );
        }
        for pair in &matched.pairs {
            let done = pair.members_already_processed();
            if done > 0 {
                log.info(
                    Stage::Match,
                    pair.subject(),
                    format!(
                        "{} of {} members already processed, loading the rest",
                        done,
                        pair.group.members.len()
                    ),
                );
            }
        }
        info!(
            files = log.summary.files_found,
            groups = log.summary.groups,
            pairs = matched.pairs.len(),
            already_processed = matched.summary.pairs_already_processed,
            "Matched groups against events"
        );

        self.progress.set_length(matched.pairs.len() as u64);
        let reshaper = Reshaper::new(encoding);
        let workers = self.config.workers.max(1).min(matched.pairs.len().max(1));

        if workers == 1 {
            for pair in &matched.pairs {
                let reshaped = reshaper.reshape_pair(pair);
                load_group(store, &reshaped, &mut log);
                self.progress.inc(1);
            }
        } else {
            self.reshape_parallel(reshaper, &matched.pairs, workers, |reshaped| {
                load_group(store, &reshaped, &mut log);
            });
        }
        self.progress.finish_and_clear();

        log.summary.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            pairs_committed = log.summary.pairs_committed,
            pairs_failed = log.summary.pairs_failed,
            rows_inserted = log.summary.rows_inserted,
            rows_duplicate = log.summary.rows_duplicate,
            duration_ms = log.summary.duration_ms,
            "Run complete"
        );
        Ok(log.into_report())
    }

    /// Reshape on `workers` threads; `commit` runs on the calling thread in
    /// arrival order.
    fn reshape_parallel<F>(
        &self,
        reshaper: Reshaper,
        pairs: &[MatchedPair],
        workers: usize,
        mut commit: F,
    ) where
        F: FnMut(ReshapedGroup),
    {
        let queue = Mutex::new(pairs.iter());
        let (tx, rx) = mpsc::sync_channel::<ReshapedGroup>(workers * CHANNEL_DEPTH_PER_WORKER);

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || loop {
                    let next = match queue.lock() {
                        Ok(mut pending) => pending.next(),
                        Err(_) => None,
                    };
                    let Some(pair) = next else { break };
                    // Receiver gone means the writer stopped; nothing left to do.
                    if tx.send(reshaper.reshape_pair(pair)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for reshaped in rx {
                commit(reshaped);
                self.progress.inc(1);
            }
        });
    }
}

fn skip_reason(error: &ReshapeError) -> SkipReason {
    match error {
        ReshapeError::Read(_) => SkipReason::UnreadableFile,
        ReshapeError::Decode(_) => SkipReason::UndecodableText,
        ReshapeError::Header(_) => SkipReason::UnreadableHeader,
        ReshapeError::EmptyWindow => SkipReason::EmptyWindow,
    }
}

/// Log per-file results of one pair and commit what was readable.
fn load_group(store: &SensorStore, group: &ReshapedGroup, log: &mut RunLog) {
    let subject = group.pair.subject();
    let mut batch = LoadBatch {
        event_label: &group.pair.event.label,
        ..LoadBatch::default()
    };

    for file in &group.files {
        match file {
            FileOutcome::Reshaped(reshaped) => {
                log.summary.files_reshaped += 1;
                log.summary.rows_outside_window += reshaped.rows_outside_window;
                log.summary.rows_malformed += reshaped.malformed.len() as u64;
                log.summary.rows_emitted += reshaped.readings.len() as u64;

                for row in &reshaped.malformed {
                    log.skip(
                        Stage::Reshape,
                        reshaped.source_file.as_str(),
                        SkipReason::MalformedRow { line: row.line },
                        row.detail.as_str(),
                    );
                }
                if !reshaped.duplicate_sensor_ids.is_empty() {
                    log.info(
                        Stage::Reshape,
                        reshaped.source_file.as_str(),
                        format!(
                            "kept first column of repeated sensor ids: {}",
                            reshaped.duplicate_sensor_ids.join(", ")
                        ),
                    );
                }

                batch.channels.extend(reshaped.channels.iter());
                batch.readings.extend(reshaped.readings.iter());
                batch.processed_files.push(&reshaped.source_file);
            }
            FileOutcome::Skipped { source_file, error } => {
                log.summary.files_skipped += 1;
                log.skip(
                    Stage::Reshape,
                    source_file.as_str(),
                    skip_reason(error),
                    error.to_string(),
                );
            }
        }
    }

    if group.has_no_readable_data() {
        log.skip(
            Stage::Reshape,
            subject,
            SkipReason::NoReadableData,
            "every member file was skipped",
        );
        return;
    }

    match store.commit(&batch) {
        Ok(outcome) => {
            log.summary.pairs_committed += 1;
            log.summary.rows_inserted += outcome.rows_inserted;
            log.summary.rows_duplicate += outcome.rows_duplicate;
            log.summary.processed_records += outcome.processed_records;
            log.info(
                Stage::Load,
                subject,
                format!(
                    "{} rows inserted, {} already present, {} files marked processed",
                    outcome.rows_inserted, outcome.rows_duplicate, outcome.processed_records
                ),
            );
        }
        Err(err) => {
            log.summary.pairs_failed += 1;
            log.error(Stage::Load, subject, SkipReason::LoadFailed, err.to_string());
        }
    }
}
