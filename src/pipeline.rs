use anyhow::{Context as AnyhowContext, Result};
use opencv as cv2;
use serde::Serialize;
use tracing::{debug, enabled, info, instrument, warn, Level};

use crate::config::Config;
use crate::correspondence::{ReconcileReport, Reconciler};
use crate::detector::Detector;
use crate::mesh::Mesh;
use crate::preprocess::{preprocess, Channels};
use crate::track::TrackingRegistry;
use crate::visualization::{RenderInput, RenderSink};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame_index: usize,
    pub vertex_count: usize,
    pub mesh_count: usize,
    pub reconcile: ReconcileReport,
}

impl FrameReport {
    /// Log the report as JSON at debug level
    pub fn log(&self) {
        if !enabled!(Level::DEBUG) {
            return;
        }
        match serde_json::to_string(self) {
            Ok(json) => debug!("{}", json),
            Err(err) => warn!("failed to serialize frame report: {}", err),
        }
    }
}

/// Runs detection, meshing and reconciliation once per frame and owns the
/// tracking state between frames.
pub struct FramePipeline {
    config: Config,
    detector: Detector,
    reconciler: Reconciler,
    registry: TrackingRegistry,
    sink: Box<dyn RenderSink>,
    frame_index: usize,
}

impl FramePipeline {
    pub fn new(config: Config, sink: Box<dyn RenderSink>) -> Result<Self> {
        config.validate()?;
        let reconciler = Reconciler::new(config.reconcile_options());
        Ok(Self {
            config,
            detector: Detector::new(),
            reconciler,
            registry: TrackingRegistry::new(),
            sink,
            frame_index: 0,
        })
    }

    pub fn registry(&self) -> &TrackingRegistry {
        &self.registry
    }

    /// Frames seen so far, including failed ones
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Track one BGR frame.
    #[instrument(skip_all, fields(frame = self.frame_index))]
    pub fn process_frame(&mut self, frame: &cv2::core::Mat) -> Result<FrameReport> {
        let frame_index = self.next_frame_index();
        let channels = preprocess(frame, self.config.back_projection)
            .with_context(|| format!("Failed to preprocess frame {}", frame_index))?;
        self.track(frame_index, Some(frame), &channels)
    }

    /// Track one frame that is already split into channels.
    pub fn process_channels(&mut self, channels: &Channels) -> Result<FrameReport> {
        let frame_index = self.next_frame_index();
        self.track(frame_index, None, channels)
    }

    fn next_frame_index(&mut self) -> usize {
        self.frame_index += 1;
        self.frame_index - 1
    }

    fn track(
        &mut self,
        frame_index: usize,
        frame: Option<&cv2::core::Mat>,
        channels: &Channels,
    ) -> Result<FrameReport> {
        let c = &self.config;
        let frame_height = channels.motion.height as f64;

        let mut vertices = self.detector.detect(
            &channels.structural,
            c.window_size,
            c.max_corners,
            c.min_distance * c.structural_separation_factor,
            c.structural_quality,
        );
        vertices.extend(self.detector.detect(
            &channels.motion,
            c.window_size,
            c.max_corners,
            c.min_distance,
            c.motion_quality,
        ));
        if c.verbose {
            info!("... {} vertices captured", vertices.len());
        }

        let max_edge_length = frame_height * c.edge_length_ratio;
        let max_displacement = frame_height * c.displacement_ratio;

        let meshes = Mesh::build(&vertices).split(max_edge_length);
        if c.verbose {
            info!("... {} meshes splitted", meshes.len());
            info!(
                "...Aligning mesh: {} --> {}",
                self.registry.len(),
                meshes.len()
            );
        }
        let mesh_count = meshes.len();
        let split = meshes.clone();

        let reconcile = self
            .reconciler
            .reconcile(&mut self.registry, meshes, max_displacement)
            .with_context(|| format!("Failed to reconcile frame {}", frame_index))?;

        // the registry already moved on, a rendering failure must not hide that
        if let Err(err) = self.sink.render(&RenderInput {
            frame_index,
            frame,
            channels,
            vertices: &vertices,
            split: &split,
            tracked: self.registry.as_slice(),
        }) {
            warn!("failed to render frame {}: {:#}", frame_index, err);
        }

        Ok(FrameReport {
            frame_index,
            vertex_count: vertices.len(),
            mesh_count,
            reconcile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use crate::my_types::*;
    use crate::track::TrackState;
    use crate::visualization::NullSink;
    use std::sync::{Arc, Mutex};

    const SIZE: usize = 128;

    fn scene(squares: &[(usize, usize)], side: usize) -> Channels {
        let mut motion = Image::filled(SIZE, SIZE, 10);
        for &(x, y) in squares {
            motion.fill_rect(x, y, side, side, 230);
        }
        Channels {
            structural: Image::filled(SIZE, SIZE, 0),
            motion,
        }
    }

    /// Counts calls and remembers how many tracks it was shown
    struct CountingSink(Arc<Mutex<Vec<usize>>>);

    impl RenderSink for CountingSink {
        fn render(&mut self, input: &RenderInput) -> Result<()> {
            self.0.lock().unwrap().push(input.tracked.len());
            Ok(())
        }
    }

    #[test]
    fn test_single_square_keeps_its_identity() {
        let mut pipeline = FramePipeline::new(Config::default(), Box::new(NullSink)).unwrap();

        let first = pipeline.process_channels(&scene(&[(30, 40)], 20)).unwrap();
        assert!(first.reconcile.bootstrap);
        assert_eq!(first.mesh_count, 1);
        assert!(first.vertex_count >= 4);
        let id = first.reconcile.added[0];

        for step in 1..=4 {
            let report = pipeline
                .process_channels(&scene(&[(30 + 4 * step, 40)], 20))
                .unwrap();
            assert_eq!(report.frame_index, step);
            assert_eq!(report.reconcile.updated, vec![id]);
            assert!(report.reconcile.added.is_empty());
        }
        let track = pipeline.registry().get(id).unwrap();
        // square spans x 46..66 and y 40..60 in the last frame
        assert!((track.centroid() - Vector2d::new(55.5, 49.5)).norm() < 2.);
        assert_eq!(track.history.len(), 4);

        // nothing visible: the track is kept but marked absent
        let empty = pipeline.process_channels(&scene(&[], 20)).unwrap();
        assert_eq!(empty.vertex_count, 0);
        assert_eq!(empty.reconcile.absent, vec![id]);
        assert_eq!(pipeline.registry().get(id).unwrap().state(), TrackState::Absent(1));
    }

    #[test]
    fn test_separate_squares_become_separate_tracks() {
        let config = Config {
            edge_length_ratio: 0.25,
            ..Default::default()
        };
        let mut pipeline = FramePipeline::new(config, Box::new(NullSink)).unwrap();

        let first = pipeline
            .process_channels(&scene(&[(10, 10), (90, 90)], 12))
            .unwrap();
        assert_eq!(first.mesh_count, 2);
        let ids = pipeline.registry().ids();
        assert_eq!(ids.len(), 2);
        let start: Vec<Vector2d> = pipeline.registry().iter().map(|t| t.centroid()).collect();

        pipeline
            .process_channels(&scene(&[(13, 12), (87, 91)], 12))
            .unwrap();
        assert_eq!(pipeline.registry().ids(), ids);
        let moved: Vec<Vector2d> = pipeline.registry().iter().map(|t| t.centroid()).collect();
        assert!((moved[0] - start[0] - Vector2d::new(3., 2.)).norm() < 2.);
        assert!((moved[1] - start[1] - Vector2d::new(-3., 1.)).norm() < 2.);
    }

    #[test]
    fn test_verbose_does_not_change_results() {
        let frames = [
            scene(&[(20, 20), (80, 70)], 14),
            scene(&[(24, 22), (78, 74)], 14),
            scene(&[(28, 24)], 14),
            scene(&[], 14),
        ];
        let run = |verbose: bool| {
            let config = Config {
                verbose,
                edge_length_ratio: 0.3,
                ..Default::default()
            };
            let mut pipeline = FramePipeline::new(config, Box::new(NullSink)).unwrap();
            frames
                .iter()
                .map(|f| pipeline.process_channels(f).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(false), run(true));
    }

    /// Fails on every frame
    struct BrokenSink;

    impl RenderSink for BrokenSink {
        fn render(&mut self, _input: &RenderInput) -> Result<()> {
            anyhow::bail!("recording closed")
        }
    }

    #[test]
    fn test_render_failure_keeps_the_report() {
        let mut pipeline = FramePipeline::new(Config::default(), Box::new(BrokenSink)).unwrap();

        let first = pipeline.process_channels(&scene(&[(30, 40)], 20)).unwrap();
        assert_eq!(first.reconcile.added.len(), 1);
        assert_eq!(pipeline.registry().ids(), first.reconcile.added);

        let second = pipeline.process_channels(&scene(&[], 20)).unwrap();
        assert_eq!(second.reconcile.absent, first.reconcile.added);
        let id = first.reconcile.added[0];
        assert_eq!(pipeline.registry().get(id).unwrap().state(), TrackState::Absent(1));
        assert_eq!(pipeline.frame_index(), 2);
    }

    #[test]
    fn test_report_serializes_as_json() {
        let mut pipeline = FramePipeline::new(Config::default(), Box::new(NullSink)).unwrap();
        let report = pipeline.process_channels(&scene(&[(30, 40)], 20)).unwrap();
        report.log();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["frame_index"], 0);
        assert_eq!(json["mesh_count"], 1);
        assert_eq!(json["reconcile"]["bootstrap"], true);
        assert_eq!(json["reconcile"]["added"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_sink_sees_every_frame() {
        let calls = Arc::new(Mutex::new(vec![]));
        let mut pipeline =
            FramePipeline::new(Config::default(), Box::new(CountingSink(calls.clone()))).unwrap();
        pipeline.process_channels(&scene(&[(30, 30)], 20)).unwrap();
        pipeline.process_channels(&scene(&[], 20)).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![1, 1]);
        assert_eq!(pipeline.frame_index(), 2);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = Config {
            window_size: 0,
            ..Default::default()
        };
        assert!(FramePipeline::new(config, Box::new(NullSink)).is_err());
    }
}
