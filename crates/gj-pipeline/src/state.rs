use gj_core::{Error, Mesh, Result, Stage, StageOutcome, VIEW_COUNT};
use image::RgbaImage;

/// Output of a stage that may be skipped by policy.
#[derive(Debug, Clone, PartialEq)]
pub enum StageRun<T> {
    Ran(T),
    Skipped,
}

impl<T> StageRun<T> {
    pub fn outcome(&self) -> StageOutcome {
        match self {
            Self::Ran(_) => StageOutcome::Ran,
            Self::Skipped => StageOutcome::Skipped,
        }
    }

    pub fn as_ran(&self) -> Option<&T> {
        match self {
            Self::Ran(value) => Some(value),
            Self::Skipped => None,
        }
    }
}

/// Six canonical views plus the front view used for texturing.
#[derive(Debug, Clone)]
pub struct MultiviewSet {
    pub views: [RgbaImage; VIEW_COUNT],
    pub front: RgbaImage,
}

impl MultiviewSet {
    /// Fails unless exactly [`VIEW_COUNT`] views are present.
    pub fn new(views: Vec<RgbaImage>, front: RgbaImage) -> Result<Self> {
        let count = views.len();
        let views: [RgbaImage; VIEW_COUNT] = views.try_into().map_err(|_| {
            Error::stage(
                Stage::MultiviewReady,
                format!("incomplete view set: expected {} views, got {}", VIEW_COUNT, count),
            )
        })?;
        Ok(Self { views, front })
    }
}

/// Everything one job has produced so far. Each slot is written exactly once,
/// in stage order, by the runner.
#[derive(Debug, Default)]
pub struct PipelineState {
    source_image: Option<RgbaImage>,
    upscaled: Option<StageRun<RgbaImage>>,
    multiview: Option<MultiviewSet>,
    normals: Option<StageRun<Vec<RgbaImage>>>,
    mesh: Option<Mesh>,
    normalized: Option<Mesh>,
}

fn fill<T>(slot: &mut Option<T>, value: T, stage: Stage) -> Result<()> {
    if slot.is_some() {
        return Err(Error::stage(stage, "stage output already recorded"));
    }
    *slot = Some(value);
    Ok(())
}

fn require<T>(slot: &Option<T>, stage: Stage) -> Result<&T> {
    slot.as_ref()
        .ok_or_else(|| Error::stage(stage, "stage has not produced its output yet"))
}

impl PipelineState {
    pub fn set_source_image(&mut self, image: RgbaImage) -> Result<()> {
        fill(&mut self.source_image, image, Stage::ImageLoaded)
    }

    pub fn set_upscaled(&mut self, run: StageRun<RgbaImage>) -> Result<()> {
        fill(&mut self.upscaled, run, Stage::Upscaled)
    }

    pub fn set_multiview(&mut self, set: MultiviewSet) -> Result<()> {
        fill(&mut self.multiview, set, Stage::MultiviewReady)
    }

    pub fn set_normals(&mut self, run: StageRun<Vec<RgbaImage>>) -> Result<()> {
        fill(&mut self.normals, run, Stage::NormalsReady)
    }

    pub fn set_mesh(&mut self, mesh: Mesh) -> Result<()> {
        fill(&mut self.mesh, mesh, Stage::GeometryReconstructed)
    }

    pub fn set_normalized(&mut self, mesh: Mesh) -> Result<()> {
        fill(&mut self.normalized, mesh, Stage::Normalized)
    }

    pub fn source_image(&self) -> Result<&RgbaImage> {
        require(&self.source_image, Stage::ImageLoaded)
    }

    pub fn upscaled(&self) -> Result<&StageRun<RgbaImage>> {
        require(&self.upscaled, Stage::Upscaled)
    }

    /// The image multiview synthesis works from: the upscaled one when
    /// super-resolution ran, the source otherwise.
    pub fn working_image(&self) -> Result<&RgbaImage> {
        match self.upscaled()?.as_ran() {
            Some(image) => Ok(image),
            None => self.source_image(),
        }
    }

    pub fn multiview(&self) -> Result<&MultiviewSet> {
        require(&self.multiview, Stage::MultiviewReady)
    }

    pub fn normals(&self) -> Result<&StageRun<Vec<RgbaImage>>> {
        require(&self.normals, Stage::NormalsReady)
    }

    pub fn mesh(&self) -> Result<&Mesh> {
        require(&self.mesh, Stage::GeometryReconstructed)
    }

    pub fn normalized(&self) -> Result<&Mesh> {
        require(&self.normalized, Stage::Normalized)
    }
}
