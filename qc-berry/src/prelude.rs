//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;
pub use crate::{QcError, QcResult};

pub use crate::config::{CutSpec, EngineConfig, SamplerSpec, SchedulePolicy};
pub use crate::consts::TEMPLATE_CUTS;

pub use crate::cut::{compute_cuts, random_slice, Cuts};
pub use crate::volume::{Affine, NiftiSource, ViewAxis, VolumeGeometry, VolumeSource};

pub use crate::dataset::home_dataset_dir_with;
pub use crate::dataset::{FileDiscovery, ItemFiles, ItemId, LayoutId, Step};

pub use crate::rating::{ClickPoint, Judgment, MemoryLedger, Rating, RatingStore, SubView};
pub use crate::render::{GraySliceRenderer, ImageRequest, Renderer};
pub use crate::schedule::WorkScheduler;
pub use crate::session::{Engine, Presentation, ReviewSession, SessionState};
