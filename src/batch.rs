//! Group-wise concurrent conversion of a selection.
//!
//! Files are split into consecutive groups of `batch_width`. Every file of a
//! group is converted at the same time on tokio's blocking pool and the whole
//! group is awaited before the next one starts, which bounds in-flight pixel
//! work without a long-lived worker pool.

use crate::image_processor::{convert_file, Rasterizer};
use crate::results::ResultSet;
use crate::types::*;
use futures_util::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Receives `(processed, total)` after every finished file.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, processed: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_progress(&self, processed: usize, total: usize) {
        self(processed, total)
    }
}

/// Progress sink that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn on_progress(&self, processed: usize, total: usize) {
        log::info!("Progress: {}/{}", processed, total);
    }
}

/// State of one invocation of the pipeline.
#[derive(Debug)]
pub struct BatchRun {
    id: Uuid,
    request: ConversionRequest,
    files: Vec<InputFile>,
    statuses: Mutex<Vec<ItemStatus>>,
    processed: AtomicUsize,
    groups_completed: AtomicUsize,
}

impl BatchRun {
    pub fn new(files: Vec<InputFile>, request: ConversionRequest) -> Self {
        let statuses = vec![ItemStatus::Pending; files.len()];
        Self {
            id: Uuid::new_v4(),
            request,
            files,
            statuses: Mutex::new(statuses),
            processed: AtomicUsize::new(0),
            groups_completed: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &ConversionRequest {
        &self.request
    }

    pub fn files(&self) -> &[InputFile] {
        &self.files
    }

    pub fn total(&self) -> usize {
        self.files.len()
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn groups_completed(&self) -> usize {
        self.groups_completed.load(Ordering::SeqCst)
    }

    pub fn status(&self, index: usize) -> Option<ItemStatus> {
        self.lock_statuses().get(index).copied()
    }

    pub fn statuses(&self) -> Vec<ItemStatus> {
        self.lock_statuses().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.processed() == self.total()
    }

    fn set_status(&self, index: usize, status: ItemStatus) {
        if let Some(slot) = self.lock_statuses().get_mut(index) {
            *slot = status;
        }
    }

    fn lock_statuses(&self) -> std::sync::MutexGuard<'_, Vec<ItemStatus>> {
        // a poisoned lock only means a status writer panicked; the data is still usable
        self.statuses.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Counts one finished file and returns the new processed count.
    fn record_completion(&self) -> usize {
        self.processed.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Drives a [`BatchRun`] through a [`Rasterizer`] in fixed-width groups.
pub struct BatchScheduler<R: Rasterizer> {
    rasterizer: Arc<R>,
    batch_width: usize,
}

impl<R: Rasterizer> BatchScheduler<R> {
    pub fn new(rasterizer: R, batch_width: usize) -> Self {
        Self::with_shared(Arc::new(rasterizer), batch_width)
    }

    pub fn with_shared(rasterizer: Arc<R>, batch_width: usize) -> Self {
        Self {
            rasterizer,
            batch_width: batch_width.max(1),
        }
    }

    pub fn batch_width(&self) -> usize {
        self.batch_width
    }

    /// Number of sequential groups a selection of `files` is split into.
    pub fn group_count(&self, files: usize) -> usize {
        (files + self.batch_width - 1) / self.batch_width
    }

    /// Converts every file of `run`, returning one result per file in
    /// selection order. Per-file errors never abort the run.
    pub async fn run<P>(&self, run: &BatchRun, progress: &P) -> ResultSet
    where
        P: ProgressSink + ?Sized,
    {
        let total = run.total();
        let request = *run.request();

        log::info!(
            "Starting run {} for {} files to {} (quality {:.2}, scale {}) in {} groups of {}",
            run.id(),
            total,
            request.format(),
            request.quality(),
            request.scale(),
            self.group_count(total),
            self.batch_width
        );

        for index in 0..total {
            run.set_status(index, ItemStatus::Queued);
        }

        let mut slots: Vec<Option<ConversionResult>> = vec![None; total];

        for (group_index, group) in run.files().chunks(self.batch_width).enumerate() {
            let offset = group_index * self.batch_width;
            log::debug!(
                "Run {}: group {}/{} ({} files)",
                run.id(),
                group_index + 1,
                self.group_count(total),
                group.len()
            );

            let conversions = group.iter().enumerate().map(|(i, file)| {
                let index = offset + i;
                async move {
                    run.set_status(index, ItemStatus::Processing);
                    let result = self.convert_item(file, request).await;
                    let status = if result.is_success() {
                        ItemStatus::Completed
                    } else {
                        ItemStatus::Errored
                    };
                    run.set_status(index, status);
                    progress.on_progress(run.record_completion(), total);
                    (index, result)
                }
            });

            for (index, result) in join_all(conversions).await {
                slots[index] = Some(result);
            }
            run.groups_completed.fetch_add(1, Ordering::SeqCst);
        }

        let results = ResultSet::new(slots.into_iter().flatten().collect());
        let failed = results.failures().count();
        if failed > 0 {
            log::warn!(
                "Run {} finished with {} failed files out of {}",
                run.id(),
                failed,
                total
            );
        } else {
            log::info!("Run {} finished: {} files converted", run.id(), total);
        }
        results
    }

    async fn convert_item(&self, file: &InputFile, request: ConversionRequest) -> ConversionResult {
        let rasterizer = Arc::clone(&self.rasterizer);
        let owned = file.clone();

        let outcome =
            tokio::task::spawn_blocking(move || convert_file(rasterizer.as_ref(), &owned, &request))
                .await
                .unwrap_or_else(|e| Err(ConversionError::Worker(e.to_string())));

        match outcome {
            Ok(converted) => ConversionResult::Success(converted),
            Err(e) => {
                log::error!("Failed to convert {}: {}", file.name, e);
                ConversionResult::Failure(FailedFile {
                    file: file.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processor::tests::png_bytes;
    use crate::image_processor::ImageProcessor;
    use image::{DynamicImage, RgbImage};
    use std::time::{Duration, Instant};

    /// Rasterizer whose input bytes are `[index, behaviour]`.
    #[derive(Default)]
    struct ScriptedRasterizer {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        events: Mutex<Vec<(usize, bool, Instant)>>,
    }

    const OK: u8 = 0;
    const BAD_DATA: u8 = 1;
    const PANIC: u8 = 2;
    const SLOW: u8 = 3;

    impl Rasterizer for ScriptedRasterizer {
        fn decode(&self, content: &[u8]) -> Result<DynamicImage, ConversionError> {
            let index = content[0] as usize;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.events.lock().unwrap().push((index, true, Instant::now()));

            // later items finish first within their group
            let delay = if content[1] == SLOW { 60 } else { 20 - (index as u64 % 3) * 5 };
            std::thread::sleep(Duration::from_millis(delay));

            self.events.lock().unwrap().push((index, false, Instant::now()));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match content[1] {
                BAD_DATA => Err(ConversionError::Decode("corrupt header".to_string())),
                PANIC => panic!("decoder crashed"),
                _ => Ok(DynamicImage::ImageRgb8(RgbImage::new(4, 4))),
            }
        }

        fn resample(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
            image.resize_exact(width, height, image::imageops::FilterType::Nearest)
        }

        fn encode(
            &self,
            _image: &DynamicImage,
            _format: TargetFormat,
            _quality: f32,
        ) -> Result<Vec<u8>, ConversionError> {
            Ok(vec![0; 10])
        }
    }

    fn scripted_files(behaviours: &[u8]) -> Vec<InputFile> {
        behaviours
            .iter()
            .enumerate()
            .map(|(i, b)| {
                InputFile::new(format!("file{}.png", i), 100, "image/png", vec![i as u8, *b])
            })
            .collect()
    }

    fn request() -> ConversionRequest {
        ConversionRequest::new(TargetFormat::Webp, 0.8, 0.5).unwrap()
    }

    #[tokio::test]
    async fn test_results_follow_selection_order() {
        let scheduler = BatchScheduler::new(ScriptedRasterizer::default(), 3);
        let run = BatchRun::new(scripted_files(&[OK; 7]), request());

        let results = scheduler.run(&run, &LogProgress).await;

        assert_eq!(results.len(), 7);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.original_name(), format!("file{}.png", i));
        }
        let exported: Vec<_> = results.export().into_iter().map(|(n, _)| n).collect();
        assert_eq!(exported[6], "file6.webp");
    }

    #[tokio::test]
    async fn test_progress_visits_every_count_once() {
        let scheduler = BatchScheduler::new(ScriptedRasterizer::default(), 3);
        let run = BatchRun::new(scripted_files(&[OK; 8]), request());
        let seen = Mutex::new(Vec::new());

        let record = |processed: usize, total: usize| seen.lock().unwrap().push((processed, total));
        scheduler.run(&run, &record).await;

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, (1..=8).map(|p| (p, 8)).collect::<Vec<_>>());
        assert_eq!(run.groups_completed(), 3);
        assert_eq!(scheduler.group_count(8), 3);
        assert!(run.is_finished());
    }

    #[tokio::test]
    async fn test_groups_never_overlap() {
        let rasterizer = Arc::new(ScriptedRasterizer::default());
        let scheduler = BatchScheduler::with_shared(Arc::clone(&rasterizer), 3);
        let run = BatchRun::new(scripted_files(&[OK, SLOW, OK, OK, OK, OK, OK]), request());

        scheduler.run(&run, &LogProgress).await;

        assert!(rasterizer.max_in_flight.load(Ordering::SeqCst) <= 3);
        let events = rasterizer.events.lock().unwrap();
        for group in 1..3 {
            let previous_end = events
                .iter()
                .filter(|(i, start, _)| !start && i / 3 == group - 1)
                .map(|(_, _, t)| *t)
                .max()
                .unwrap();
            let next_start = events
                .iter()
                .filter(|(i, start, _)| *start && i / 3 == group)
                .map(|(_, _, t)| *t)
                .min()
                .unwrap();
            assert!(previous_end <= next_start, "group {} started early", group);
        }
    }

    #[tokio::test]
    async fn test_failures_stay_isolated() {
        let scheduler = BatchScheduler::new(ScriptedRasterizer::default(), 3);
        let run = BatchRun::new(scripted_files(&[OK, BAD_DATA, OK, PANIC, OK]), request());

        let results = scheduler.run(&run, &LogProgress).await;

        assert_eq!(results.len(), 5);
        let outcomes: Vec<bool> = results.iter().map(|r| r.is_success()).collect();
        assert_eq!(outcomes, vec![true, false, true, false, true]);

        let failures: Vec<_> = results.failures().collect();
        assert_eq!(failures[0].file.name, "file1.png");
        assert!(failures[0].reason.contains("corrupt header"));
        assert_eq!(failures[1].file.name, "file3.png");
        assert!(failures[1].reason.starts_with("Conversion worker failed"));

        assert_eq!(
            run.statuses(),
            vec![
                ItemStatus::Completed,
                ItemStatus::Errored,
                ItemStatus::Completed,
                ItemStatus::Errored,
                ItemStatus::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_run_completes() {
        let scheduler = BatchScheduler::new(ScriptedRasterizer::default(), 3);
        let run = BatchRun::new(Vec::new(), request());

        let results = scheduler.run(&run, &LogProgress).await;
        assert!(results.is_empty());
        assert_eq!(run.groups_completed(), 0);
    }

    #[test]
    fn test_new_run_is_pending_and_width_is_at_least_one() {
        let run = BatchRun::new(scripted_files(&[OK, OK]), request());
        assert_eq!(run.statuses(), vec![ItemStatus::Pending; 2]);
        assert_eq!(run.processed(), 0);

        let scheduler = BatchScheduler::new(ImageProcessor::new(), 0);
        assert_eq!(scheduler.batch_width(), 1);
    }

    #[tokio::test]
    async fn test_three_pngs_to_webp_in_one_group() {
        let sizes = [(64, 32), (48, 48), (20, 10)];
        let files: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(i, (w, h))| {
                InputFile::from_bytes(format!("shot{}.png", i), "image/png", png_bytes(*w, *h))
            })
            .collect();

        let scheduler = BatchScheduler::new(ImageProcessor::new(), 3);
        let run = BatchRun::new(files, request());
        let last = Mutex::new((0, 0));

        let results = scheduler
            .run(&run, &|processed: usize, total: usize| {
                let mut last = last.lock().unwrap();
                *last = (processed.max(last.0), total);
            })
            .await;

        assert_eq!(*last.lock().unwrap(), (3, 3));
        assert_eq!(run.groups_completed(), 1);

        let converted: Vec<_> = results.successes().collect();
        assert_eq!(converted.len(), 3);
        for (i, (converted, (w, h))) in converted.iter().zip(sizes).enumerate() {
            assert_eq!(converted.converted_name, format!("shot{}.webp", i));
            assert_eq!((converted.width, converted.height), (w / 2, h / 2));
            assert_eq!(
                image::guess_format(&converted.content).unwrap(),
                image::ImageFormat::WebP
            );
        }
    }

    #[tokio::test]
    async fn test_oversized_target_fails_only_that_item() {
        let scheduler = BatchScheduler::new(ImageProcessor::new(), 3);
        let files = vec![
            InputFile::from_bytes("ok.png", "image/png", png_bytes(4, 4)),
            InputFile::from_bytes("strip.png", "image/png", png_bytes(7_000, 1)),
        ];
        let request = ConversionRequest::new(TargetFormat::Png, 0.8, MAX_SCALE).unwrap();
        let run = BatchRun::new(files, request);

        let results = scheduler.run(&run, &LogProgress).await;

        assert_eq!(results.len(), 2);
        match results.get(0) {
            Some(ConversionResult::Success(converted)) => {
                assert_eq!((converted.width, converted.height), (40, 40))
            }
            other => panic!("expected success, got {:?}", other),
        }
        match results.get(1) {
            Some(ConversionResult::Failure(failed)) => {
                assert!(failed.reason.starts_with("Could not encode image"))
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(run.status(1), Some(ItemStatus::Errored));
    }
}
