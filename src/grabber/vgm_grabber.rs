//! Replay engine for a VGM sequence.
//!
//! Per step the engine pulls one line from each active ground-truth
//! channel and one frame from the image sequence, fuses the measurements
//! into a camera-frame object pose and fans the result out to the
//! subscribers. Steps are driven either by the caller (`Mode::Cooperative`)
//! or by a dedicated worker thread (`Mode::Background`).
//!
//! The sources and the subscriber registry live in a [`Session`] behind a
//! mutex that is held for the whole step, so two steps never overlap.
//! Whether a step may run at all is decided by the atomic [`AtomicState`],
//! which the worker checks between steps.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nalgebra::{Vector3, Vector4};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dataset::{Camera, VgmDataset};
use crate::error::{GrabberError, RecordError};
use crate::fusion::PoseFusion;
use crate::io::{FrameSource, ImageSequence, SegmentRecord, TextCursor, TrajectoryRecord};

use super::callbacks::{CallbackRegistry, Signature};
use super::flags::CapabilityFlags;
use super::state::{AtomicState, Mode, ReplayState, StepOutcome};

/// Back-off of the worker while there is nothing to read.
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// Open status of each source, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenSources {
    pub frames: bool,
    pub segments: bool,
    pub trajectories: bool,
}

impl OpenSources {
    pub fn any(&self) -> bool {
        self.frames || self.segments || self.trajectories
    }
}

/// Requests a stop without joining the worker.
///
/// Safe to use from inside a subscriber running on the worker thread; the
/// worker exits at the next step boundary.
#[derive(Debug, Clone)]
pub struct StopHandle {
    state: Arc<AtomicState>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.state.stop();
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }
}

/// Everything a step touches.
struct Session<S: FrameSource> {
    callbacks: CallbackRegistry<S::Frame>,
    frames: S,
    segments: TextCursor,
    trajectories: TextCursor,
    fusion: PoseFusion,
    marker_count: usize,
    flags: CapabilityFlags,
    frame_nr: u64,
}

impl<S: FrameSource> Session<S> {
    /// Open the sources selected by `flags`. On error the caller closes
    /// whatever was already opened.
    fn open(&mut self, dataset: &VgmDataset) -> Result<(), GrabberError> {
        if self.flags.contains(CapabilityFlags::HAS_IMAGE) {
            self.frames
                .open(&dataset.frame_pattern)
                .map_err(|source| GrabberError::OpenFrames {
                    pattern: dataset.frame_pattern.clone(),
                    source,
                })?;
        }
        if self.flags.contains(CapabilityFlags::HAS_SEGMENTS) {
            open_cursor(
                &mut self.segments,
                &dataset.ground_truth,
                dataset.offsets.segments,
            )?;
        }
        if self.flags.contains(CapabilityFlags::HAS_TRAJECTORIES) {
            open_cursor(
                &mut self.trajectories,
                &dataset.ground_truth,
                dataset.offsets.trajectories,
            )?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.frames.is_open() {
            self.frames.close();
        }
        self.segments.close();
        self.trajectories.close();
    }

    fn open_sources(&self) -> OpenSources {
        OpenSources {
            frames: self.frames.is_open(),
            segments: self.segments.is_open(),
            trajectories: self.trajectories.is_open(),
        }
    }

    /// Read, decimate, decode, fuse, dispatch. Nothing is dispatched unless
    /// every active source produced a valid sample.
    fn step(&mut self) -> StepOutcome {
        let flags = self.flags;
        if flags.is_empty() {
            return StepOutcome::Idle;
        }

        let segment_line = if flags.contains(CapabilityFlags::HAS_SEGMENTS) {
            match self.segments.next_line() {
                Some(line) => Some(line),
                None => {
                    info!("segments channel exhausted");
                    return StepOutcome::EndOfStream;
                }
            }
        } else {
            None
        };

        let trajectory_line = if flags.contains(CapabilityFlags::HAS_TRAJECTORIES) {
            match self.trajectories.next_line() {
                Some(line) => Some(line),
                None => {
                    info!("trajectories channel exhausted");
                    return StepOutcome::EndOfStream;
                }
            }
        } else {
            None
        };

        let sample = self.frame_nr;
        self.frame_nr += 1;
        if flags.decimates() && sample % 2 == 1 {
            return StepOutcome::Decimated;
        }

        let frame = if flags.contains(CapabilityFlags::HAS_IMAGE) {
            match self.frames.next_frame() {
                Some(frame) => Some(frame),
                None => {
                    info!(sample, "image sequence exhausted");
                    return StepOutcome::EndOfStream;
                }
            }
        } else {
            None
        };

        let segment = match segment_line.as_deref().map(SegmentRecord::parse).transpose() {
            Ok(segment) => segment,
            Err(e) => {
                record_end("segments", sample, &e);
                return StepOutcome::EndOfStream;
            }
        };

        let trajectory = match trajectory_line
            .as_deref()
            .map(|line| TrajectoryRecord::parse(line, self.marker_count))
            .transpose()
        {
            Ok(trajectory) => trajectory,
            Err(e) => {
                record_end("trajectories", sample, &e);
                return StepOutcome::EndOfStream;
            }
        };

        // Prefer the id of the record, trajectories over segments
        let id = trajectory
            .as_ref()
            .map(|t| t.frame)
            .or(segment.as_ref().map(|s| s.frame))
            .unwrap_or(sample);

        let pose = match (&frame, self.callbacks.has_subscribers(Signature::ImagePose)) {
            (Some(_), true) => {
                let pose = match (&trajectory, &segment) {
                    (Some(trajectory), _) => self.fusion.fuse_markers(&trajectory.markers),
                    (None, Some(segment)) => Some(self.fusion.fuse_segment(segment)),
                    (None, None) => None,
                };
                match pose {
                    Some(pose) => Some((pose.rotation_axis_angle_4(), pose.translation_4())),
                    None => {
                        warn!(id, "degenerate marker configuration, stopping replay");
                        return StepOutcome::EndOfStream;
                    }
                }
            }
            _ => None,
        };

        if let (Some(frame), Some((rvec, tvec))) = (&frame, &pose) {
            self.callbacks.dispatch_image_pose(id, frame, rvec, tvec);
        }
        if let Some(trajectory) = &trajectory {
            self.callbacks.dispatch_markers(id, &trajectory.markers);
        }
        StepOutcome::Dispatched
    }
}

fn open_cursor(cursor: &mut TextCursor, path: &Path, offset: u64) -> Result<(), GrabberError> {
    let to_error = |source| GrabberError::OpenGroundTruth {
        path: path.to_path_buf(),
        source,
    };
    cursor.open(path).map_err(to_error)?;
    cursor.seek(offset).map_err(to_error)
}

fn record_end(channel: &str, sample: u64, error: &RecordError) {
    match error {
        RecordError::Empty => debug!(channel, sample, "end of section"),
        _ => warn!(channel, sample, "malformed record, stopping replay: {}", error),
    }
}

/// Run one step if the state allows it; moves to `Stopped` on end of stream.
fn run_step<S: FrameSource>(state: &AtomicState, session: &Mutex<Session<S>>) -> StepOutcome {
    let mut session = session.lock();
    if !state.is_running() {
        return StepOutcome::Idle;
    }
    let outcome = session.step();
    if outcome == StepOutcome::EndOfStream {
        state.stop();
        info!(samples = session.frame_nr, "end of stream, replay stopped");
    }
    outcome
}

/// Grabber for the VGM dataset.
///
/// Register subscribers, then [`start`](Self::start). In cooperative mode
/// call [`trigger`](Self::trigger) until it reports
/// [`StepOutcome::EndOfStream`]; in background mode the worker does it.
pub struct VgmGrabber<S: FrameSource = ImageSequence> {
    dataset: VgmDataset,
    state: Arc<AtomicState>,
    session: Arc<Mutex<Session<S>>>,
    worker: Option<JoinHandle<()>>,
}

impl VgmGrabber<ImageSequence> {
    /// Load the sequence at `path` and read frames with [`ImageSequence`].
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self::new(VgmDataset::load(path)?, ImageSequence::new()))
    }
}

impl<S: FrameSource> VgmGrabber<S> {
    pub fn new(dataset: VgmDataset, frames: S) -> Self {
        let session = Session {
            callbacks: CallbackRegistry::new(),
            frames,
            segments: TextCursor::new(),
            trajectories: TextCursor::new(),
            fusion: PoseFusion::new(&dataset.camera, &dataset.markers),
            marker_count: dataset.markers.len(),
            flags: CapabilityFlags::empty(),
            frame_nr: 0,
        };
        Self {
            dataset,
            state: Arc::new(AtomicState::default()),
            session: Arc::new(Mutex::new(session)),
            worker: None,
        }
    }

    pub fn dataset(&self) -> &VgmDataset {
        &self.dataset
    }

    /// Camera used during acquisition.
    pub fn camera(&self) -> &Camera {
        &self.dataset.camera
    }

    /// Reference marker positions in the object-local frame.
    pub fn reference_points(&self) -> &[Vector3<f64>] {
        self.dataset.markers.points()
    }

    /// Subscribe to `(id, frame, rotation, translation)` samples.
    ///
    /// Takes effect on the next [`start`](Self::start).
    pub fn register_image_pose<C>(&mut self, callback: C)
    where
        C: FnMut(u64, &S::Frame, &Vector4<f64>, &Vector4<f64>) + Send + 'static,
    {
        self.session.lock().callbacks.register_image_pose(callback);
    }

    /// Subscribe to `(id, measured markers)` samples.
    ///
    /// Takes effect on the next [`start`](Self::start).
    pub fn register_markers<C>(&mut self, callback: C)
    where
        C: FnMut(u64, &[Vector3<f64>]) + Send + 'static,
    {
        self.session.lock().callbacks.register_markers(callback);
    }

    pub fn has_subscribers(&self, signature: Signature) -> bool {
        self.session.lock().callbacks.has_subscribers(signature)
    }

    /// Open the sources the subscribers need and begin playback.
    ///
    /// Only valid while stopped. A playback that ended on its own is
    /// released first, so a finished grabber can simply be started again.
    /// On failure every source is closed and the grabber stays stopped.
    pub fn start(&mut self, mode: Mode) -> Result<(), GrabberError> {
        if self.state.is_running() {
            return Err(GrabberError::AlreadyRunning);
        }
        self.release();

        {
            let mut session = self.session.lock();
            session.flags = session.callbacks.flags();
            session.frame_nr = 0;
            if let Err(e) = session.open(&self.dataset) {
                session.close();
                warn!("failed to start replay: {}", e);
                return Err(e);
            }
            debug!(flags = ?session.flags, "sources opened");
        }

        self.state.store(ReplayState::Running(mode));

        if mode == Mode::Background {
            let state = self.state.clone();
            let session = self.session.clone();
            let spawned = thread::Builder::new()
                .name("vgm-replay".to_string())
                .spawn(move || Self::run(state, session));
            match spawned {
                Ok(handle) => self.worker = Some(handle),
                Err(e) => {
                    self.state.stop();
                    self.session.lock().close();
                    return Err(GrabberError::Spawn(e));
                }
            }
        }

        info!(?mode, "replay started");
        Ok(())
    }

    /// Stop playback, join the worker and release every source.
    ///
    /// Idempotent.
    pub fn stop(&mut self) {
        let previous = self.state.stop();
        self.release();
        if previous.is_running() {
            info!("replay stopped");
        }
    }

    /// Run one step in cooperative mode.
    ///
    /// A no-op unless running in [`Mode::Cooperative`]; in background mode
    /// the worker owns the pacing.
    pub fn trigger(&self) -> StepOutcome {
        match self.state.load() {
            ReplayState::Running(Mode::Cooperative) => run_step(&self.state, &self.session),
            _ => StepOutcome::Idle,
        }
    }

    pub fn state(&self) -> ReplayState {
        self.state.load()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Samples consumed since the last start.
    pub fn frame_nr(&self) -> u64 {
        self.session.lock().frame_nr
    }

    /// Flags computed by the last start.
    pub fn flags(&self) -> CapabilityFlags {
        self.session.lock().flags
    }

    pub fn open_sources(&self) -> OpenSources {
        self.session.lock().open_sources()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            state: self.state.clone(),
        }
    }

    /// Join a worker, if any, and close all sources.
    fn release(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.thread().id() == thread::current().id() {
                // Joining ourselves would deadlock; the loop exits on its own.
                debug!("release called from the replay worker");
            } else if handle.join().is_err() {
                warn!("replay worker panicked");
            }
        }
        self.session.lock().close();
    }

    /// Worker loop: step until stopped or out of data.
    fn run(state: Arc<AtomicState>, session: Arc<Mutex<Session<S>>>) {
        debug!("replay worker started");
        while state.is_running() {
            match run_step(&state, &session) {
                StepOutcome::EndOfStream => break,
                StepOutcome::Idle => thread::sleep(IDLE_BACKOFF),
                StepOutcome::Decimated | StepOutcome::Dispatched => {}
            }
        }
        debug!("replay worker exited");
    }
}

impl<S: FrameSource> Drop for VgmGrabber<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Instant;

    use anyhow::bail;
    use approx::assert_relative_eq;
    use crossbeam_channel::unbounded;
    use nalgebra::{Matrix3, UnitQuaternion};
    use tempfile::TempDir;

    use crate::dataset::MarkerModel;
    use crate::geometry::SE3;

    /// Frame source yielding `0, 1, 2, ...` up to `total` frames.
    #[derive(Debug, Default)]
    struct CountingFrames {
        total: u64,
        next: u64,
        open: bool,
        fail_open: bool,
    }

    impl CountingFrames {
        fn new(total: u64) -> Self {
            Self {
                total,
                ..Default::default()
            }
        }
    }

    impl FrameSource for CountingFrames {
        type Frame = u64;

        fn open(&mut self, pattern: &str) -> anyhow::Result<()> {
            if self.fail_open {
                bail!("cannot open {}", pattern);
            }
            self.open = true;
            self.next = 0;
            Ok(())
        }

        fn next_frame(&mut self) -> Option<u64> {
            if !self.open || self.next >= self.total {
                return None;
            }
            self.next += 1;
            Some(self.next - 1)
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn model() -> MarkerModel {
        MarkerModel::new(vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(80.0, 0.0, 0.0),
            Vector3::new(0.0, 60.0, 0.0),
            Vector3::new(0.0, 0.0, 40.0),
        ])
        .unwrap()
    }

    fn camera(world_to_camera: SE3) -> Camera {
        Camera {
            width: 640,
            height: 480,
            k: Matrix3::identity(),
            world_to_camera,
        }
    }

    /// Object pose in the world frame at frame `i`.
    fn object_pose(i: u64) -> SE3 {
        SE3::new(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.1 * i as f64),
            Vector3::new(100.0 + i as f64, -50.0, 900.0),
        )
    }

    fn segment_line(i: u64) -> String {
        format!("{},0,0.0,0.0,{:.1},{:.1},-50.0,900.0", i, i as f64, 100.0 + i as f64)
    }

    fn trajectory_line(i: u64) -> String {
        let markers = object_pose(i).transform_points(model().points());
        let coords: Vec<String> = markers
            .iter()
            .flat_map(|m| [m.x, m.y, m.z])
            .map(|v| format!("{:.9}", v))
            .collect();
        format!("{},0,{}", i, coords.join(","))
    }

    fn write_ground_truth(dir: &Path, segments: &[String], trajectories: &[String]) -> PathBuf {
        let mut text = String::new();
        if !segments.is_empty() {
            text.push_str("Segments\r\n100\r\n,,L\r\n");
            text.push_str("Frame,Sub Frame,RX,RY,RZ,TX,TY,TZ\r\n,,deg\r\n");
            for line in segments {
                text.push_str(line);
                text.push_str("\r\n");
            }
            text.push_str("\r\n");
        }
        if !trajectories.is_empty() {
            text.push_str("Trajectories\r\n100\r\n,,L:m1\r\nFrame,Sub Frame,X,Y,Z\r\n,,mm\r\n");
            for line in trajectories {
                text.push_str(line);
                text.push_str("\r\n");
            }
        }
        let path = dir.join("L0001.csv");
        fs::write(&path, text).unwrap();
        path
    }

    fn grabber_with(
        segments: usize,
        trajectories: usize,
        frames: CountingFrames,
        extrinsic: SE3,
    ) -> (TempDir, VgmGrabber<CountingFrames>) {
        let dir = tempfile::tempdir().unwrap();
        let segments: Vec<_> = (1..=segments as u64).map(segment_line).collect();
        let trajectories: Vec<_> = (1..=trajectories as u64).map(trajectory_line).collect();
        let path = write_ground_truth(dir.path(), &segments, &trajectories);
        let dataset =
            VgmDataset::new(camera(extrinsic), model(), path, "frames/%08d.jpg".into()).unwrap();
        (dir, VgmGrabber::new(dataset, frames))
    }

    fn wait_until_stopped<S: FrameSource>(grabber: &VgmGrabber<S>) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while grabber.is_running() {
            assert!(Instant::now() < deadline, "replay did not stop");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_no_subscribers_opens_nothing() {
        let (_dir, mut grabber) = grabber_with(4, 4, CountingFrames::new(10), SE3::identity());

        grabber.start(Mode::Cooperative).unwrap();
        assert!(grabber.flags().is_empty());
        assert!(!grabber.open_sources().any());

        for _ in 0..10 {
            assert_eq!(grabber.trigger(), StepOutcome::Idle);
        }
        assert_eq!(grabber.frame_nr(), 0);
        assert!(grabber.is_running());

        grabber.stop();
        assert_eq!(grabber.state(), ReplayState::Stopped);
    }

    #[test]
    fn test_markers_only_replay() {
        let (_dir, mut grabber) = grabber_with(0, 4, CountingFrames::new(0), SE3::identity());
        let (tx, rx) = unbounded();
        grabber.register_markers(move |id, markers| {
            tx.send((id, markers.to_vec())).unwrap();
        });

        grabber.start(Mode::Cooperative).unwrap();
        assert_eq!(grabber.flags(), CapabilityFlags::HAS_TRAJECTORIES);
        let open = grabber.open_sources();
        assert!(open.trajectories && !open.segments && !open.frames);

        for _ in 0..4 {
            assert_eq!(grabber.trigger(), StepOutcome::Dispatched);
        }
        assert!(grabber.is_running());
        assert_eq!(grabber.trigger(), StepOutcome::EndOfStream);
        assert_eq!(grabber.state(), ReplayState::Stopped);
        assert_eq!(grabber.trigger(), StepOutcome::Idle);

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 4);
        for (i, (id, markers)) in received.iter().enumerate() {
            let frame = i as u64 + 1;
            assert_eq!(*id, frame);
            let expected = object_pose(frame).transform_points(model().points());
            assert_eq!(markers.len(), 4);
            for (m, e) in markers.iter().zip(expected.iter()) {
                assert_relative_eq!(*m, *e, epsilon = 1e-6);
            }
        }

        grabber.stop();
        assert!(!grabber.open_sources().any());
    }

    // The 2:1 text-to-image pairing is specific to the VGM recordings.
    #[test]
    fn test_decimation_parity() {
        for n in [1u64, 2, 5, 8] {
            let (_dir, mut grabber) =
                grabber_with(n as usize, 0, CountingFrames::new(100), SE3::identity());
            let (tx, rx) = unbounded();
            grabber.register_image_pose(move |id, frame: &u64, _, _| {
                tx.send((id, *frame)).unwrap();
            });
            grabber.start(Mode::Cooperative).unwrap();
            assert_eq!(
                grabber.flags(),
                CapabilityFlags::HAS_IMAGE | CapabilityFlags::HAS_SEGMENTS
            );

            for step in 0..n {
                let expected = if step % 2 == 0 {
                    StepOutcome::Dispatched
                } else {
                    StepOutcome::Decimated
                };
                assert_eq!(grabber.trigger(), expected);
            }
            assert_eq!(grabber.trigger(), StepOutcome::EndOfStream);

            let received: Vec<_> = rx.try_iter().collect();
            assert_eq!(received.len() as u64, n.div_ceil(2));
            for (k, (id, frame)) in received.iter().enumerate() {
                // Even samples carry the next held frame
                assert_eq!(*frame, k as u64);
                assert_eq!(*id, 2 * k as u64 + 1);
            }
        }
    }

    #[test]
    fn test_image_exhaustion_stops_replay() {
        let (_dir, mut grabber) = grabber_with(10, 0, CountingFrames::new(2), SE3::identity());
        let (tx, rx) = unbounded();
        grabber.register_image_pose(move |id, _: &u64, _, _| tx.send(id).unwrap());
        grabber.start(Mode::Cooperative).unwrap();

        let mut outcomes = Vec::new();
        loop {
            let outcome = grabber.trigger();
            outcomes.push(outcome);
            if outcome == StepOutcome::EndOfStream {
                break;
            }
        }
        assert_eq!(
            outcomes,
            vec![
                StepOutcome::Dispatched,
                StepOutcome::Decimated,
                StepOutcome::Dispatched,
                StepOutcome::Decimated,
                StepOutcome::EndOfStream,
            ]
        );
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_fused_pose_in_camera_frame() {
        let extrinsic = SE3::new(
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.4),
            Vector3::new(10.0, -20.0, 1500.0),
        );
        let (_dir, mut grabber) = grabber_with(6, 6, CountingFrames::new(100), extrinsic);
        let (tx, rx) = unbounded();
        grabber.register_image_pose(move |id, _: &u64, rvec, tvec| {
            tx.send((id, *rvec, *tvec)).unwrap();
        });
        grabber.register_markers(|_, _| {});

        grabber.start(Mode::Cooperative).unwrap();
        assert_eq!(grabber.flags(), CapabilityFlags::all());
        while grabber.trigger() != StepOutcome::EndOfStream {}

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 3);
        for (id, rvec, tvec) in received {
            let expected = extrinsic.compose(&object_pose(id));
            let pose = SE3::from_axis_angle_4(&rvec, &tvec);
            assert_relative_eq!(
                pose.rotation_matrix(),
                expected.rotation_matrix(),
                epsilon = 1e-6
            );
            assert_relative_eq!(pose.translation, expected.translation, epsilon = 1e-4);
            assert_eq!(tvec.w, 0.0);
        }
    }

    #[test]
    fn test_segment_pose_without_trajectories() {
        let (_dir, mut grabber) = grabber_with(1, 0, CountingFrames::new(1), SE3::identity());
        let (tx, rx) = unbounded();
        grabber.register_image_pose(move |_, _: &u64, rvec, tvec| {
            tx.send((*rvec, *tvec)).unwrap();
        });

        grabber.start(Mode::Cooperative).unwrap();
        assert_eq!(grabber.trigger(), StepOutcome::Dispatched);

        // segment_line(1): 1 degree about Z, translation (101, -50, 900)
        let (rvec, tvec) = rx.try_recv().unwrap();
        assert_relative_eq!(rvec, Vector4::new(0.0, 0.0, 1.0, 1f64.to_radians()), epsilon = 1e-9);
        assert_relative_eq!(tvec, Vector4::new(101.0, -50.0, 900.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_malformed_record_ends_replay() {
        let dir = tempfile::tempdir().unwrap();
        let trajectories = vec![
            trajectory_line(1),
            trajectory_line(2),
            "3,0,1.0,2.0".to_string(),
            trajectory_line(4),
        ];
        let path = write_ground_truth(dir.path(), &[], &trajectories);
        let dataset =
            VgmDataset::new(camera(SE3::identity()), model(), path, String::new()).unwrap();
        let mut grabber = VgmGrabber::new(dataset, CountingFrames::new(0));
        let (tx, rx) = unbounded();
        grabber.register_markers(move |id, _| tx.send(id).unwrap());

        grabber.start(Mode::Cooperative).unwrap();
        assert_eq!(grabber.trigger(), StepOutcome::Dispatched);
        assert_eq!(grabber.trigger(), StepOutcome::Dispatched);
        assert_eq!(grabber.trigger(), StepOutcome::EndOfStream);
        assert!(!grabber.is_running());
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_short_segment_record_ends_replay() {
        let dir = tempfile::tempdir().unwrap();
        // Sample 2 is the first kept sample after the good record
        let segments = vec![
            segment_line(1),
            segment_line(2),
            "3,0,0.0,0.0".to_string(),
            segment_line(4),
        ];
        let path = write_ground_truth(dir.path(), &segments, &[]);
        let dataset =
            VgmDataset::new(camera(SE3::identity()), model(), path, String::new()).unwrap();
        let mut grabber = VgmGrabber::new(dataset, CountingFrames::new(10));
        let (tx, rx) = unbounded();
        grabber.register_image_pose(move |id, _: &u64, _, _| tx.send(id).unwrap());

        grabber.start(Mode::Cooperative).unwrap();
        assert_eq!(grabber.trigger(), StepOutcome::Dispatched);
        assert_eq!(grabber.trigger(), StepOutcome::Decimated);
        assert_eq!(grabber.trigger(), StepOutcome::EndOfStream);
        assert_eq!(grabber.state(), ReplayState::Stopped);
        assert_eq!(grabber.trigger(), StepOutcome::Idle);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_failed_start_releases_sources_and_allows_retry() {
        let (dir, mut grabber) = grabber_with(4, 4, CountingFrames::new(10), SE3::identity());
        grabber.register_image_pose(|_, _: &u64, _, _| {});
        grabber.register_markers(|_, _| {});

        let csv = dir.path().join("L0001.csv");
        let contents = fs::read(&csv).unwrap();
        fs::remove_file(&csv).unwrap();

        let err = grabber.start(Mode::Cooperative).unwrap_err();
        assert!(matches!(err, GrabberError::OpenGroundTruth { .. }));
        assert_eq!(grabber.state(), ReplayState::Stopped);
        assert!(!grabber.open_sources().any());
        assert_eq!(grabber.trigger(), StepOutcome::Idle);

        fs::write(&csv, contents).unwrap();
        grabber.start(Mode::Cooperative).unwrap();
        assert_eq!(grabber.trigger(), StepOutcome::Dispatched);
    }

    #[test]
    fn test_frame_source_open_failure() {
        let frames = CountingFrames {
            fail_open: true,
            ..CountingFrames::new(10)
        };
        let (_dir, mut grabber) = grabber_with(4, 0, frames, SE3::identity());
        grabber.register_image_pose(|_, _: &u64, _, _| {});

        let err = grabber.start(Mode::Background).unwrap_err();
        assert!(matches!(err, GrabberError::OpenFrames { .. }));
        assert!(!grabber.is_running());
        assert!(!grabber.open_sources().any());
    }

    #[test]
    fn test_start_while_running_fails() {
        let (_dir, mut grabber) = grabber_with(0, 4, CountingFrames::new(0), SE3::identity());
        grabber.register_markers(|_, _| {});
        grabber.start(Mode::Cooperative).unwrap();
        assert!(matches!(
            grabber.start(Mode::Cooperative),
            Err(GrabberError::AlreadyRunning)
        ));
        assert!(grabber.is_running());
    }

    #[test]
    fn test_restart_replays_from_the_beginning() {
        let (_dir, mut grabber) = grabber_with(0, 2, CountingFrames::new(0), SE3::identity());
        let (tx, rx) = unbounded();
        grabber.register_markers(move |id, _| tx.send(id).unwrap());

        for _ in 0..2 {
            grabber.start(Mode::Cooperative).unwrap();
            while grabber.trigger() != StepOutcome::EndOfStream {}
        }
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_background_runs_to_completion() {
        let (_dir, mut grabber) = grabber_with(0, 50, CountingFrames::new(0), SE3::identity());
        let (tx, rx) = unbounded();
        grabber.register_markers(move |id, _| tx.send(id).unwrap());

        grabber.start(Mode::Background).unwrap();
        assert_eq!(grabber.trigger(), StepOutcome::Idle);
        wait_until_stopped(&grabber);

        let ids: Vec<_> = rx.try_iter().collect();
        assert_eq!(ids, (1..=50).collect::<Vec<_>>());
        assert_eq!(grabber.frame_nr(), 50);

        grabber.stop();
        assert!(!grabber.open_sources().any());
    }

    #[test]
    fn test_stop_mid_background_run() {
        let (_dir, mut grabber) = grabber_with(0, 2000, CountingFrames::new(0), SE3::identity());
        let (tx, rx) = unbounded();
        grabber.register_markers(move |id, _| {
            thread::sleep(Duration::from_millis(1));
            let _ = tx.send(id);
        });

        grabber.start(Mode::Background).unwrap();
        for _ in 0..5 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        grabber.stop();

        assert_eq!(grabber.state(), ReplayState::Stopped);
        assert!(!grabber.open_sources().any());

        // Nothing is dispatched once stop() has returned
        let dispatched = 5 + rx.try_iter().count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(rx.try_iter().count(), 0);
        assert!(dispatched < 2000);
    }

    #[test]
    fn test_stop_handle_from_subscriber() {
        let (_dir, mut grabber) = grabber_with(0, 100, CountingFrames::new(0), SE3::identity());
        let handle = grabber.stop_handle();
        let (tx, rx) = unbounded();
        grabber.register_markers(move |id, _| {
            tx.send(id).unwrap();
            if id == 3 {
                handle.request_stop();
            }
        });

        grabber.start(Mode::Background).unwrap();
        wait_until_stopped(&grabber);
        grabber.stop();

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(!grabber.open_sources().any());
    }

    #[test]
    fn test_drop_stops_worker() {
        let (_dir, mut grabber) = grabber_with(0, 2000, CountingFrames::new(0), SE3::identity());
        let (tx, rx) = unbounded();
        grabber.register_markers(move |id, _| {
            thread::sleep(Duration::from_millis(1));
            let _ = tx.send(id);
        });
        grabber.start(Mode::Background).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        drop(grabber);

        let _ = rx.try_iter().count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(rx.try_iter().count(), 0);
    }
}
