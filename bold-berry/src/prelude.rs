//! 常用类型.

pub use crate::config::{GoodvoxelsConfig, PipelineConfig, ResampleConfig, SurfaceConfig};
pub use crate::error::{CompositionError, ResampleError, Result};
pub use crate::flow::{fan_out_join, Joined, Scheduler, Slots, Task, Workflow};
pub use crate::goodvoxels::{Goodvoxels, GoodvoxelsEstimator, GoodvoxelsReport};
pub use crate::grayords::{BrainModel, Density, GrayordinateSeries, GrayordinatesAssembler, Structure};
pub use crate::kernel::{Interpolation, KernelError, ReferenceKernel, SurfaceKernel, VolumeKernel};
pub use crate::pipeline::{BoldResamplingPipeline, PipelineInputs, PipelineOutputs};
pub use crate::resample::{BoldTransforms, NativeResampler, StandardResampler, StdJoined};
pub use crate::space::{KeyedMap, SpatialReference};
pub use crate::surface::fslr::FslrResampler;
pub use crate::surface::fsnative::{FsSubject, FsSurfaceSampler, FsTarget};
pub use crate::surface::{HemiPair, Hemisphere, Mesh, SurfaceCatalog};
pub use crate::template::{TemplateCatalog, TemplateResolver};
pub use crate::transform::{Frame, SeriesChain, Transform, TransformChain};
pub use crate::{Grid, Mask, Series, Volume};
