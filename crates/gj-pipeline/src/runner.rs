use gj_core::{
    Error, JobArtifacts, JobRequest, Result, Stage, StageMachine, StageOutcome, VIEW_COUNT,
    WorkerEvent, normalize,
};
use tracing::{error, info};

use crate::contracts::{ExportSettings, ReconstructParams};
use crate::staging::ArtifactStaging;
use crate::state::{MultiviewSet, PipelineState, StageRun};
use crate::zoo::ModelZoo;

/// Inputs whose shorter side is below this go through super-resolution first.
pub const UPSCALE_THRESHOLD: u32 = 512;

/// Receives every transition of a running job.
pub trait StageObserver {
    fn on_event(&mut self, event: &WorkerEvent);
}

impl StageObserver for Vec<WorkerEvent> {
    fn on_event(&mut self, event: &WorkerEvent) {
        self.push(event.clone());
    }
}

/// Runs one job's stages in order, exactly once.
pub struct JobRunner<'a> {
    request: &'a JobRequest,
    observer: &'a mut dyn StageObserver,
    machine: StageMachine,
    state: PipelineState,
    attempting: Stage,
}

impl<'a> JobRunner<'a> {
    pub fn new(request: &'a JobRequest, observer: &'a mut dyn StageObserver) -> Self {
        Self {
            request,
            observer,
            machine: StageMachine::new(),
            state: PipelineState::default(),
            attempting: Stage::Init,
        }
    }

    /// Execute the job. `init_models` builds the model set and is called once,
    /// after the request has been validated.
    pub fn run<F>(mut self, init_models: F) -> Result<JobArtifacts>
    where
        F: FnOnce() -> anyhow::Result<ModelZoo>,
    {
        self.observer.on_event(&WorkerEvent::Stage(self.machine.trace()[0].clone()));

        match self.execute(init_models) {
            Ok(artifacts) => Ok(artifacts),
            Err(err) => {
                let reached = self.machine.fail();
                error!(
                    attempting = %self.attempting,
                    reached = %reached,
                    error = %err,
                    "generation job failed"
                );
                self.observer.on_event(&WorkerEvent::Failed {
                    kind: err.kind(),
                    stage: Some(self.attempting),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn execute<F>(&mut self, init_models: F) -> Result<JobArtifacts>
    where
        F: FnOnce() -> anyhow::Result<ModelZoo>,
    {
        self.request.validate()?;

        self.attempting = Stage::ModelsReady;
        let zoo = init_models().map_err(|e| Error::ModelInit(format!("{:#}", e)))?;
        info!(device = %zoo.device, "models ready");
        self.enter(Stage::ModelsReady, StageOutcome::Ran)?;

        self.load_image()?;
        self.upscale(&zoo)?;
        self.predict_multiview(&zoo)?;
        self.predict_normals(&zoo)?;
        self.reconstruct(&zoo)?;
        self.normalize()?;
        let artifacts = self.export(&zoo)?;

        self.attempting = Stage::Done;
        self.enter(Stage::Done, StageOutcome::Ran)?;
        Ok(artifacts)
    }

    fn enter(&mut self, stage: Stage, outcome: StageOutcome) -> Result<()> {
        let event = self
            .machine
            .advance(stage, outcome)
            .map_err(|msg| Error::stage(stage, msg))?;
        info!(stage = %stage, outcome = ?outcome, "stage complete");
        self.observer.on_event(&WorkerEvent::Stage(event));
        Ok(())
    }

    fn load_image(&mut self) -> Result<()> {
        self.attempting = Stage::ImageLoaded;
        let path = &self.request.input_image_path;
        let image = image::open(path)
            .map_err(|e| {
                Error::InvalidInput(format!("cannot read image {}: {}", path.display(), e))
            })?
            .to_rgba8();
        info!(width = image.width(), height = image.height(), "input image loaded");

        self.state.set_source_image(image)?;
        self.enter(Stage::ImageLoaded, StageOutcome::Ran)
    }

    fn upscale(&mut self, zoo: &ModelZoo) -> Result<()> {
        self.attempting = Stage::Upscaled;
        let source = self.state.source_image()?;
        let shorter_side = source.width().min(source.height());

        let run = if shorter_side < UPSCALE_THRESHOLD {
            info!(shorter_side, "running super-resolution");
            let upscaled = zoo
                .upscaler
                .upscale(vec![source.clone()])
                .map_err(|e| Error::stage(Stage::Upscaled, format!("{:#}", e)))?
                .into_iter()
                .next()
                .ok_or_else(|| Error::stage(Stage::Upscaled, "upscaler returned no image"))?;
            StageRun::Ran(upscaled)
        } else {
            info!(shorter_side, "input is large enough, skipping super-resolution");
            StageRun::Skipped
        };

        let outcome = run.outcome();
        self.state.set_upscaled(run)?;
        self.enter(Stage::Upscaled, outcome)
    }

    fn predict_multiview(&mut self, zoo: &ModelZoo) -> Result<()> {
        self.attempting = Stage::MultiviewReady;
        let output = zoo
            .multiview
            .predict_multiview(
                self.state.working_image()?,
                self.request.remove_background,
                self.request.seed,
            )
            .map_err(|e| Error::stage(Stage::MultiviewReady, format!("{:#}", e)))?;

        self.state
            .set_multiview(MultiviewSet::new(output.views, output.front)?)?;
        self.enter(Stage::MultiviewReady, StageOutcome::Ran)
    }

    fn predict_normals(&mut self, zoo: &ModelZoo) -> Result<()> {
        self.attempting = Stage::NormalsReady;

        let run = if self.request.refine {
            let views = &self.state.multiview()?.views;
            let normals = zoo
                .normals
                .predict_normals(views)
                .map_err(|e| Error::stage(Stage::NormalsReady, format!("{:#}", e)))?;
            if normals.len() != VIEW_COUNT {
                return Err(Error::stage(
                    Stage::NormalsReady,
                    format!("expected {} normal maps, got {}", VIEW_COUNT, normals.len()),
                ));
            }
            StageRun::Ran(normals)
        } else {
            info!("refinement off, skipping normal prediction");
            StageRun::Skipped
        };

        let outcome = run.outcome();
        self.state.set_normals(run)?;
        self.enter(Stage::NormalsReady, outcome)
    }

    fn reconstruct(&mut self, zoo: &ModelZoo) -> Result<()> {
        self.attempting = Stage::GeometryReconstructed;
        let multiview = self.state.multiview()?;
        let normals = self.state.normals()?.as_ran().map(|maps| maps.as_slice());
        let params = ReconstructParams {
            refine: self.request.refine,
            predict_normal: normals.is_none(),
            expansion_weight: self.request.expansion_weight,
            init_type: self.request.init_type,
        };

        let mesh = zoo
            .reconstructor
            .reconstruct(&multiview.views, normals, &multiview.front, &params)
            .map_err(|e| Error::Reconstruction(format!("{:#}", e)))?;
        if mesh.face_count() == 0 {
            return Err(Error::Reconstruction("reconstructed mesh has no faces".into()));
        }
        info!(
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "geometry reconstructed"
        );

        self.state.set_mesh(mesh)?;
        self.enter(Stage::GeometryReconstructed, StageOutcome::Ran)
    }

    fn normalize(&mut self) -> Result<()> {
        self.attempting = Stage::Normalized;
        let normalized = normalize(self.state.mesh()?);
        self.state.set_normalized(normalized)?;
        self.enter(Stage::Normalized, StageOutcome::Ran)
    }

    fn export(&mut self, zoo: &ModelZoo) -> Result<JobArtifacts> {
        self.attempting = Stage::Exported;
        let staging = ArtifactStaging::new(self.request);
        let settings = ExportSettings::turntable(self.request.render_video);

        zoo.exporter
            .export(staging.prefix(), self.state.normalized()?, &settings)
            .map_err(|e| Error::stage(Stage::Exported, format!("{:#}", e)))?;

        let artifacts = staging.commit(self.request.render_video)?;
        self.enter(Stage::Exported, StageOutcome::Ran)?;
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use anyhow::bail;
    use gj_core::job::artifact_path;
    use gj_core::{FailureKind, GenerateOptions, Mesh, Texture};
    use glam::Vec3;
    use image::RgbaImage;

    use super::*;
    use crate::contracts::*;

    #[derive(Default)]
    struct Recorder {
        upscale_calls: Cell<usize>,
        normal_calls: Cell<usize>,
        views_returned: Cell<usize>,
        fail_reconstruct: Cell<bool>,
        last_params: Cell<Option<ReconstructParams>>,
        seen_seed: Cell<Option<i64>>,
        multiview_input_width: Cell<u32>,
    }

    impl Upscaler for Recorder {
        fn upscale(&self, images: Vec<RgbaImage>) -> anyhow::Result<Vec<RgbaImage>> {
            self.upscale_calls.set(self.upscale_calls.get() + 1);
            Ok(images
                .iter()
                .map(|img| RgbaImage::new(img.width() * 4, img.height() * 4))
                .collect())
        }
    }

    impl MultiviewPredictor for Recorder {
        fn predict_multiview(
            &self,
            image: &RgbaImage,
            _remove_background: bool,
            seed: i64,
        ) -> anyhow::Result<MultiviewOutput> {
            self.seen_seed.set(Some(seed));
            self.multiview_input_width.set(image.width());
            let count = match self.views_returned.get() {
                0 => VIEW_COUNT,
                n => n,
            };
            Ok(MultiviewOutput {
                views: vec![RgbaImage::new(8, 8); count],
                front: RgbaImage::new(8, 8),
            })
        }
    }

    impl NormalPredictor for Recorder {
        fn predict_normals(&self, views: &[RgbaImage]) -> anyhow::Result<Vec<RgbaImage>> {
            self.normal_calls.set(self.normal_calls.get() + 1);
            Ok(views.to_vec())
        }
    }

    impl Reconstructor for Recorder {
        fn reconstruct(
            &self,
            _views: &[RgbaImage],
            _normals: Option<&[RgbaImage]>,
            _front: &RgbaImage,
            params: &ReconstructParams,
        ) -> anyhow::Result<Mesh> {
            self.last_params.set(Some(*params));
            if self.fail_reconstruct.get() {
                bail!("optimisation diverged");
            }
            Ok(Mesh::new(
                vec![Vec3::ONE, Vec3::X, Vec3::Y],
                vec![[0, 1, 2]],
                Texture::VertexColors {
                    colors: vec![Vec3::ONE; 3],
                },
            )?)
        }
    }

    impl Exporter for Recorder {
        fn export(
            &self,
            output_prefix: &Path,
            mesh: &Mesh,
            settings: &ExportSettings,
        ) -> anyhow::Result<()> {
            assert!((mesh.vertices()[0].x - -0.675).abs() < 1e-6);
            assert_eq!(settings.camera, CameraType::Orthographic);
            fs::write(artifact_path(output_prefix, "glb"), b"glTF")?;
            if settings.export_video {
                fs::write(artifact_path(output_prefix, "mp4"), b"mp4")?;
            }
            Ok(())
        }
    }

    fn zoo(recorder: &Arc<Recorder>) -> ModelZoo {
        ModelZoo {
            device: "test".into(),
            upscaler: Box::new(Arc::clone(recorder)),
            multiview: Box::new(Arc::clone(recorder)),
            normals: Box::new(Arc::clone(recorder)),
            reconstructor: Box::new(Arc::clone(recorder)),
            exporter: Box::new(Arc::clone(recorder)),
        }
    }

    fn job(dir: &Path, size: u32, options: GenerateOptions) -> JobRequest {
        let input = dir.join("input.png");
        RgbaImage::new(size, size).save(&input).unwrap();
        JobRequest::new(input, dir.join("gj-job"), &options)
    }

    fn stages(events: &[WorkerEvent]) -> Vec<(Stage, StageOutcome)> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Stage(s) => Some((s.stage, s.outcome)),
                WorkerEvent::Failed { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_full_run_small_image_with_refine_and_video() {
        let dir = tempfile::tempdir().unwrap();
        let request = job(
            dir.path(),
            256,
            GenerateOptions {
                remove_background: true,
                seed: 42,
                render_video: true,
                refine: true,
                expansion_weight: 0.1,
                init_type: gj_core::InitType::Std,
            },
        );
        let recorder = Arc::new(Recorder::default());
        let mut events = Vec::new();

        let artifacts = JobRunner::new(&request, &mut events)
            .run(|| Ok(zoo(&recorder)))
            .unwrap();

        use StageOutcome::Ran;
        assert_eq!(
            stages(&events),
            vec![
                (Stage::Init, Ran),
                (Stage::ModelsReady, Ran),
                (Stage::ImageLoaded, Ran),
                (Stage::Upscaled, Ran),
                (Stage::MultiviewReady, Ran),
                (Stage::NormalsReady, Ran),
                (Stage::GeometryReconstructed, Ran),
                (Stage::Normalized, Ran),
                (Stage::Exported, Ran),
                (Stage::Done, Ran),
            ]
        );
        assert_eq!(artifacts.mesh_path, request.mesh_path());
        assert_eq!(artifacts.video_path, Some(request.video_path()));
        assert!(request.mesh_path().is_file());
        assert!(request.video_path().is_file());
        assert_eq!(recorder.upscale_calls.get(), 1);
        assert_eq!(recorder.multiview_input_width.get(), 1024);
        assert_eq!(recorder.seen_seed.get(), Some(42));
        assert_eq!(recorder.normal_calls.get(), 1);
        let params = recorder.last_params.get().unwrap();
        assert!(params.refine);
        assert!(!params.predict_normal);
    }

    #[test]
    fn test_large_image_skips_upscale() {
        let dir = tempfile::tempdir().unwrap();
        let request = job(dir.path(), 512, GenerateOptions::default());
        let recorder = Arc::new(Recorder::default());
        let mut events = Vec::new();

        let artifacts = JobRunner::new(&request, &mut events)
            .run(|| Ok(zoo(&recorder)))
            .unwrap();

        assert_eq!(recorder.upscale_calls.get(), 0);
        assert!(stages(&events).contains(&(Stage::Upscaled, StageOutcome::Skipped)));
        assert_eq!(recorder.multiview_input_width.get(), 512);
        assert_eq!(artifacts.video_path, None);
    }

    #[test]
    fn test_refine_off_skips_normals_and_asks_reconstructor() {
        let dir = tempfile::tempdir().unwrap();
        let options = GenerateOptions {
            refine: false,
            ..GenerateOptions::default()
        };
        let request = job(dir.path(), 600, options);
        let recorder = Arc::new(Recorder::default());
        let mut events = Vec::new();

        JobRunner::new(&request, &mut events)
            .run(|| Ok(zoo(&recorder)))
            .unwrap();

        assert_eq!(recorder.normal_calls.get(), 0);
        assert!(stages(&events).contains(&(Stage::NormalsReady, StageOutcome::Skipped)));
        let params = recorder.last_params.get().unwrap();
        assert!(!params.refine);
        assert!(params.predict_normal);
    }

    #[test]
    fn test_reconstruction_failure_leaves_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let options = GenerateOptions {
            render_video: true,
            ..GenerateOptions::default()
        };
        let request = job(dir.path(), 256, options);
        let recorder = Arc::new(Recorder::default());
        recorder.fail_reconstruct.set(true);
        let mut events = Vec::new();

        let err = JobRunner::new(&request, &mut events)
            .run(|| Ok(zoo(&recorder)))
            .unwrap_err();

        assert!(matches!(err, Error::Reconstruction(_)));
        assert!(!request.mesh_path().exists());
        assert!(!request.video_path().exists());
        match events.last().unwrap() {
            WorkerEvent::Failed { kind, stage, .. } => {
                assert_eq!(*kind, FailureKind::Reconstruction);
                assert_eq!(*stage, Some(Stage::GeometryReconstructed));
            }
            other => panic!("expected failure event, got {:?}", other),
        }
    }

    #[test]
    fn test_incomplete_view_set_is_stage_error() {
        let dir = tempfile::tempdir().unwrap();
        let request = job(dir.path(), 512, GenerateOptions::default());
        let recorder = Arc::new(Recorder::default());
        recorder.views_returned.set(4);
        let mut events = Vec::new();

        let err = JobRunner::new(&request, &mut events)
            .run(|| Ok(zoo(&recorder)))
            .unwrap_err();

        assert!(matches!(
            err,
            Error::StagePrediction { stage: Stage::MultiviewReady, .. }
        ));
    }

    #[test]
    fn test_model_init_failure() {
        let dir = tempfile::tempdir().unwrap();
        let request = job(dir.path(), 512, GenerateOptions::default());
        let mut events = Vec::new();

        let err = JobRunner::new(&request, &mut events)
            .run(|| bail!("no CUDA device"))
            .unwrap_err();

        assert!(matches!(err, Error::ModelInit(_)));
        assert_eq!(err.exit_code(), 3);
        assert!(!stages(&events).iter().any(|(s, _)| *s == Stage::ModelsReady));
    }

    #[test]
    fn test_invalid_request_never_initialises_models() {
        let dir = tempfile::tempdir().unwrap();
        let request = JobRequest::new(
            PathBuf::from("/no/such/image.png"),
            dir.path().join("gj-job"),
            &GenerateOptions::default(),
        );
        let mut events = Vec::new();
        let mut initialised = false;

        let err = JobRunner::new(&request, &mut events)
            .run(|| {
                initialised = true;
                bail!("unreachable")
            })
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!initialised);
    }
}
