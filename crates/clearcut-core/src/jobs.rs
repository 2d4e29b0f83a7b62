//! Remote raster export jobs: submission, polling with caller-controlled
//! backoff, download, and local digestion of the downloaded tiles.
//!
//! The polling loop never sleeps directly; it goes through a [`Clock`], so
//! tests drive it with [`ManualClock`] and a scripted [`JobRunner`].

use std::collections::HashMap;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::date;
use crate::error::{AlertError, Result};
use crate::geometry::{bounds_of, covers, BBox, MultiPolygon};
use crate::geotiff::{self, SampleType};
use crate::grid::{AlertRaster, Grid};

// ── Job model ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub id: String,
    pub description: String,
}

/// One band to export, already in its stored encoding.
#[derive(Debug, Clone)]
pub struct ExportJob {
    /// Also the file prefix of the downloaded pieces.
    pub description: String,
    pub band: Grid<f64>,
    pub sample: SampleType,
}

/// An out-of-process batch service.
pub trait JobRunner: Send + Sync {
    fn submit(&self, job: ExportJob) -> Result<JobHandle>;

    fn poll(&self, handle: &JobHandle) -> Result<JobStatus>;

    /// Fetch the finished job's files into `dir`; returns their paths.
    fn download(&self, handle: &JobHandle, dir: &Path) -> Result<Vec<PathBuf>>;
}

// ── Clock and backoff ───────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    fn sleep(&self, d: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Records sleeps instead of performing them.
#[derive(Debug, Default)]
pub struct ManualClock {
    slept: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn elapsed(&self) -> Duration {
        self.sleeps().into_iter().sum()
    }
}

impl Clock for ManualClock {
    fn sleep(&self, d: Duration) {
        if let Ok(mut s) = self.slept.lock() {
            s.push(d);
        }
    }
}

/// Geometric backoff between polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub initial_ms: u64,
    pub factor: f64,
    pub max_ms: u64,
    /// Polls before giving up.
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { initial_ms: 5_000, factor: 1.5, max_ms: 60_000, max_attempts: 240 }
    }
}

impl Backoff {
    /// Delay after the `attempt`-th unsuccessful poll (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self.initial_ms as f64 * self.factor.max(1.0).powi(attempt.min(64) as i32);
        Duration::from_millis(ms.min(self.max_ms as f64) as u64)
    }
}

/// Poll every handle until all succeed. The first failure is reported with
/// its job description; running out of attempts fails the first
/// unfinished job.
pub fn wait_for_completion(
    runner: &dyn JobRunner,
    handles: &[JobHandle],
    backoff: &Backoff,
    clock: &dyn Clock,
) -> Result<()> {
    let mut last: HashMap<&JobHandle, JobStatus> = HashMap::new();
    for attempt in 0..backoff.max_attempts.max(1) {
        let mut pending = 0;
        for h in handles {
            if last.get(h) == Some(&JobStatus::Succeeded) {
                continue;
            }
            let status = runner.poll(h)?;
            if last.get(h) != Some(&status) {
                debug!(job = %h.description, ?status, "job status changed");
            }
            if let JobStatus::Failed(message) = &status {
                return Err(AlertError::RemoteJobFailed { description: h.description.clone(), message: message.clone() });
            }
            if !status.is_finished() {
                pending += 1;
            }
            last.insert(h, status);
        }
        if pending == 0 {
            info!(jobs = handles.len(), polls = attempt + 1, "all jobs finished");
            return Ok(());
        }
        clock.sleep(backoff.delay(attempt));
    }
    let stuck = handles
        .iter()
        .find(|h| last.get(h) != Some(&JobStatus::Succeeded))
        .map_or_else(String::new, |h| h.description.clone());
    Err(AlertError::RemoteJobFailed {
        description: stuck,
        message: format!("not finished after {} polls", backoff.max_attempts),
    })
}

// ── In-process runner ───────────────────────────────────────────────────────

struct LocalJob {
    job: ExportJob,
    polls: u32,
}

/// Runs export jobs in-process. Each job reports `Running` on its first
/// poll and `Succeeded` afterwards; its download is the band split into
/// horizontal strips of at most `strip_rows` rows, like a provider
/// splitting a large export into several files.
pub struct LocalJobRunner {
    strip_rows: usize,
    next_id: AtomicU64,
    jobs: Mutex<HashMap<String, LocalJob>>,
}

impl LocalJobRunner {
    pub fn new(strip_rows: usize) -> Self {
        Self { strip_rows: strip_rows.max(1), next_id: AtomicU64::new(0), jobs: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, LocalJob>>> {
        self.jobs
            .lock()
            .map_err(|_| AlertError::RemoteJobFailed { description: "local runner".into(), message: "poisoned".into() })
    }
}

impl JobRunner for LocalJobRunner {
    fn submit(&self, job: ExportJob) -> Result<JobHandle> {
        let id = format!("local-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = JobHandle { id: id.clone(), description: job.description.clone() };
        info!(job = %handle.description, %id, "submitted export job");
        self.lock()?.insert(id, LocalJob { job, polls: 0 });
        Ok(handle)
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobStatus> {
        let mut jobs = self.lock()?;
        let Some(entry) = jobs.get_mut(&handle.id) else {
            return Ok(JobStatus::Failed(format!("unknown job {}", handle.id)));
        };
        entry.polls += 1;
        Ok(if entry.polls == 1 { JobStatus::Running } else { JobStatus::Succeeded })
    }

    fn download(&self, handle: &JobHandle, dir: &Path) -> Result<Vec<PathBuf>> {
        let jobs = self.lock()?;
        let entry = jobs
            .get(&handle.id)
            .ok_or_else(|| AlertError::MissingAsset(format!("job {}", handle.id)))?;
        let band = &entry.job.band;
        let (_, dy) = band.pixel_size();
        let mut paths = Vec::new();
        let mut row = 0;
        while row < band.height {
            let rows = self.strip_rows.min(band.height - row);
            let lo = band.min_lat + row as f64 * dy;
            let strip_bounds = BBox::new(band.min_lon, lo, band.max_lon, lo + rows as f64 * dy);
            let mut strip = Grid::new(band.width, rows, strip_bounds, 0.0);
            for r in 0..rows {
                for c in 0..band.width {
                    strip.set(r, c, band.get(row + r, c));
                }
            }
            let path = dir.join(format!("{}-{:04}.tif", entry.job.description, paths.len()));
            geotiff::write_band(&path, &strip, entry.job.sample)?;
            paths.push(path);
            row += rows;
        }
        debug!(job = %handle.description, files = paths.len(), "downloaded export");
        Ok(paths)
    }
}

// ── Local digestion ─────────────────────────────────────────────────────────

/// Deletes its files when dropped, whether or not the step succeeded.
struct Cleanup(Vec<PathBuf>);

impl Drop for Cleanup {
    fn drop(&mut self) {
        for p in &self.0 {
            match fs::remove_file(p) {
                Ok(()) => debug!(path = %p.display(), "removed temporary file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %p.display(), error = %e, "could not remove temporary file"),
            }
        }
    }
}

/// Pixel-wise mosaic on the first grid's resolution over the union of all
/// footprints. Later grids win wherever they are non-zero.
fn mosaic_grids(grids: Vec<Grid<f64>>) -> Option<Grid<f64>> {
    let first = grids.first()?;
    let pixel = first.pixel_size();
    let bounds = grids.iter().skip(1).fold(first.bounds(), |acc, g| acc.union(&g.bounds()));
    let mut out = Grid::covering(&bounds, pixel, 0.0);
    for g in &grids {
        for r in 0..g.height {
            for c in 0..g.width {
                let v = g.get(r, c);
                if v == 0.0 || !v.is_finite() {
                    continue;
                }
                let p = g.pixel_center(r, c);
                if let Some((or, oc)) = out.locate(p.x, p.y) {
                    out.set(or, oc, v);
                }
            }
        }
    }
    Some(out)
}

/// Mosaic every `prefix*.tif` in `dir` (sorted by name, last wins) into an
/// LZW GeoTIFF at `dst`. The pieces are deleted even if the merge fails.
pub fn digest_tiles(prefix: &str, dir: &Path, dst: &Path) -> Result<()> {
    let mut pieces: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().is_some_and(|e| e == "tif")
                && p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with(prefix))
                && p.as_path() != dst
        })
        .collect();
    pieces.sort();
    let _cleanup = Cleanup(pieces.clone());
    if pieces.is_empty() {
        return Err(AlertError::MissingInput(format!("no `{prefix}*.tif` in {}", dir.display())));
    }

    let grids = pieces.iter().map(|p| geotiff::read_band(p)).collect::<Result<Vec<_>>>()?;
    let merged = mosaic_grids(grids).ok_or_else(|| AlertError::MissingInput(prefix.to_string()))?;
    geotiff::write_band(dst, &merged, SampleType::minimal_for(&merged))?;
    info!(prefix, pieces = pieces.len(), dst = %dst.display(), "merged downloaded tiles");
    Ok(())
}

/// Crop `tmp` to the AOI, zero every pixel whose centre lies outside it,
/// and store it at `dst` with the smallest sufficient sample type. `tmp` is
/// removed afterwards, also on failure.
pub fn cut_to_aoi(tmp: &Path, aoi: &MultiPolygon, dst: &Path) -> Result<()> {
    let _cleanup = Cleanup(vec![tmp.to_path_buf()]);
    let grid = geotiff::read_band(tmp)?;
    let bounds = bounds_of(aoi)
        .ok_or_else(|| AlertError::InvalidGeometry("empty area of interest".into()))?;
    let mut cut = grid
        .crop(&bounds)
        .ok_or_else(|| AlertError::EmptyResult(format!("{} does not cover the area of interest", tmp.display())))?;
    for r in 0..cut.height {
        for c in 0..cut.width {
            if !covers(aoi, cut.pixel_center(r, c)) {
                cut.set(r, c, 0.0);
            }
        }
    }
    geotiff::write_band(dst, &cut, SampleType::minimal_for(&cut))?;
    info!(dst = %dst.display(), width = cut.width, height = cut.height, "cut raster to area of interest");
    Ok(())
}

/// Years a `YYDDD` value can carry in a `u16` band.
pub const YYDDD_YEARS: RangeInclusive<i32> = 2000..=2065;

/// Canonical `YYYY.DDD` → `YYDDD`, 0 for no data. Dates outside
/// [`YYDDD_YEARS`] are rejected rather than clamped.
pub fn to_yyddd(canonical: f64) -> Result<f64> {
    if !canonical.is_finite() {
        return Ok(0.0);
    }
    let d = date::decode(canonical)?;
    if !YYDDD_YEARS.contains(&d.year()) {
        return Err(AlertError::InvalidDate(format!(
            "{d} cannot be stored as YYDDD (years {}..={})",
            YYDDD_YEARS.start(),
            YYDDD_YEARS.end()
        )));
    }
    Ok(((d.year() - 2000) * 1000 + d.ordinal() as i32) as f64)
}

/// Final files of one raster export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedRasters {
    pub map: PathBuf,
    pub date: PathBuf,
}

/// Export both bands of `raster` through `runner` and digest them into
/// `{basename}_map.tif` (alert classes) and `{basename}_date.tif` (`YYDDD`)
/// in `dir`.
pub fn export_alert_rasters(
    runner: &dyn JobRunner,
    raster: &AlertRaster,
    aoi: &MultiPolygon,
    basename: &str,
    dir: &Path,
    backoff: &Backoff,
    clock: &dyn Clock,
) -> Result<ExportedRasters> {
    let map_job = ExportJob {
        description: format!("{basename}_map"),
        band: raster.alert.map(f64::from),
        sample: SampleType::U8,
    };
    let mut date_band = raster.date.clone();
    for v in date_band.data.iter_mut() {
        *v = to_yyddd(*v)?;
    }
    let date_job = ExportJob { description: format!("{basename}_date"), band: date_band, sample: SampleType::U16 };
    let handles = vec![runner.submit(map_job)?, runner.submit(date_job)?];
    wait_for_completion(runner, &handles, backoff, clock)?;

    let mut finals = Vec::with_capacity(2);
    for h in &handles {
        runner.download(h, dir)?;
        let tmp = dir.join(format!("{}_tmp_{}.tif", basename, band_suffix(&h.description, basename)));
        let dst = dir.join(format!("{}.tif", h.description));
        digest_tiles(&format!("{}-", h.description), dir, &tmp)?;
        cut_to_aoi(&tmp, aoi, &dst)?;
        finals.push(dst);
    }
    let date = finals.pop().unwrap_or_default();
    let map = finals.pop().unwrap_or_default();
    Ok(ExportedRasters { map, date })
}

fn band_suffix<'a>(description: &'a str, basename: &str) -> &'a str {
    description.strip_prefix(basename).map_or(description, |s| s.trim_start_matches('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::bbox_polygon;
    use std::collections::VecDeque;

    /// Replays a scripted status sequence per job.
    struct Scripted {
        scripts: Mutex<HashMap<String, VecDeque<JobStatus>>>,
        polls: AtomicU64,
    }

    impl Scripted {
        fn new(scripts: &[(&str, &[JobStatus])]) -> Self {
            let map = scripts.iter().map(|(id, s)| (id.to_string(), s.iter().cloned().collect())).collect();
            Self { scripts: Mutex::new(map), polls: AtomicU64::new(0) }
        }
    }

    impl JobRunner for Scripted {
        fn submit(&self, job: ExportJob) -> Result<JobHandle> {
            Ok(JobHandle { id: job.description.clone(), description: job.description })
        }

        fn poll(&self, handle: &JobHandle) -> Result<JobStatus> {
            self.polls.fetch_add(1, Ordering::Relaxed);
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.get_mut(&handle.id).unwrap();
            Ok(if queue.len() > 1 { queue.pop_front().unwrap() } else { queue[0].clone() })
        }

        fn download(&self, _: &JobHandle, _: &Path) -> Result<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    fn handle(id: &str) -> JobHandle {
        JobHandle { id: id.into(), description: format!("export {id}") }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let b = Backoff { initial_ms: 1000, factor: 2.0, max_ms: 5000, max_attempts: 10 };
        let delays: Vec<u64> = (0..5).map(|a| b.delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000]);
    }

    /// ✓ Waiting uses the injected clock: no real sleep, one delay per round.
    #[test]
    fn waits_until_every_job_succeeds() {
        use JobStatus::*;
        let runner = Scripted::new(&[("a", &[Pending, Running, Succeeded]), ("b", &[Running, Succeeded])]);
        let clock = ManualClock::new();
        let backoff = Backoff { initial_ms: 100, factor: 2.0, max_ms: 1000, max_attempts: 10 };
        wait_for_completion(&runner, &[handle("a"), handle("b")], &backoff, &clock).unwrap();
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
        assert_eq!(runner.polls.load(Ordering::Relaxed), 5, "succeeded jobs are not polled again");
    }

    #[test]
    fn failure_carries_the_job_description() {
        use JobStatus::*;
        let runner = Scripted::new(&[("a", &[Running, Failed("quota".into())])]);
        let err = wait_for_completion(&runner, &[handle("a")], &Backoff::default(), &ManualClock::new()).unwrap_err();
        match err {
            AlertError::RemoteJobFailed { description, message } => {
                assert_eq!(description, "export a");
                assert_eq!(message, "quota");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let runner = Scripted::new(&[("a", &[JobStatus::Running])]);
        let clock = ManualClock::new();
        let backoff = Backoff { initial_ms: 10, factor: 1.0, max_ms: 10, max_attempts: 4 };
        let err = wait_for_completion(&runner, &[handle("a")], &backoff, &clock).unwrap_err();
        assert!(matches!(err, AlertError::RemoteJobFailed { .. }));
        assert_eq!(clock.elapsed(), Duration::from_millis(40));
    }

    #[test]
    fn yyddd_fits_u16() {
        assert_eq!(to_yyddd(2021.205).unwrap(), 21_205.0);
        assert_eq!(to_yyddd(f64::NAN).unwrap(), 0.0);
        assert_eq!(to_yyddd(2000.001).unwrap(), 1.0);
        assert!(to_yyddd(2065.365).unwrap() <= u16::MAX as f64);
    }

    /// ✓ Dates a `u16` YYDDD band cannot hold are errors, never clamped.
    #[test]
    fn yyddd_rejects_out_of_range_years() {
        assert!(matches!(to_yyddd(1999.365), Err(AlertError::InvalidDate(_))));
        assert!(matches!(to_yyddd(2066.001), Err(AlertError::InvalidDate(_))));
        assert!(matches!(to_yyddd(2021.400), Err(AlertError::InvalidDate(_))), "day 400 does not exist");
    }

    #[test]
    fn export_fails_on_unstorable_dates() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = sample_raster();
        r.set(1, 1, 1, 1998.100);
        let aoi = bbox_polygon(&r.bounds());
        let runner = LocalJobRunner::new(2);
        let err = export_alert_rasters(&runner, &r, &aoi, "alerts", dir.path(), &Backoff::default(), &ManualClock::new())
            .unwrap_err();
        assert!(matches!(err, AlertError::InvalidDate(_)), "{err:?}");
        assert!(!dir.path().join("alerts_date.tif").exists());
    }

    fn sample_raster() -> AlertRaster {
        let mut r = AlertRaster::masked(6, 5, BBox::new(0.0, 0.0, 0.6, 0.5));
        r.set(0, 0, 1, 2021.010);
        r.set(2, 3, 2, 2021.200);
        r.set(4, 5, 1, 2021.300);
        r
    }

    /// ✓ Pieces are merged, temporaries removed, and the AOI cut applied.
    #[test]
    fn digest_and_cut_leave_only_final_files() {
        let dir = tempfile::tempdir().unwrap();
        let runner = LocalJobRunner::new(2);
        let aoi = bbox_polygon(&BBox::new(0.0, 0.0, 0.45, 0.5));
        let out = export_alert_rasters(
            &runner,
            &sample_raster(),
            &aoi,
            "aoi_2021-01-01_2021-12-31_RADD",
            dir.path(),
            &Backoff::default(),
            &ManualClock::new(),
        )
        .unwrap();

        let mut names: Vec<String> =
            fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
        names.sort();
        assert_eq!(names, vec!["aoi_2021-01-01_2021-12-31_RADD_date.tif", "aoi_2021-01-01_2021-12-31_RADD_map.tif"]);

        let map = geotiff::read_band(&out.map).unwrap();
        assert_eq!((map.width, map.height), (5, 5), "cropped to the AOI columns");
        assert_eq!(map.get(0, 0), 1.0);
        assert_eq!(map.get(2, 3), 2.0);
        let date = geotiff::read_band(&out.date).unwrap();
        assert_eq!(date.get(2, 3), 21_200.0);
    }

    #[test]
    fn pieces_are_removed_even_when_merge_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("job-0000.tif");
        fs::write(&bogus, b"not a tiff").unwrap();
        let dst = dir.path().join("job_tmp.tif");
        assert!(digest_tiles("job-", dir.path(), &dst).is_err());
        assert!(!bogus.exists(), "the guard deletes inputs on failure");
        assert!(matches!(digest_tiles("job-", dir.path(), &dst), Err(AlertError::MissingInput(_))));
    }
}
