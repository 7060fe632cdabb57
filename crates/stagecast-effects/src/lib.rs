//! Stagecast Effects - image processes run through the job queue
//!
//! Every process wraps one kernel and binds a typed parameter struct into
//! kernel arguments ([`ImageProcess`]):
//! - [`Transform`]: anchor/fill/rotation placement
//! - [`Mix`] and [`Wipe`]: two-input dissolve and hard cut
//! - [`Combine`]: N-layer "over" composite
//! - [`Transition`]: dissolve or (masked) wipe between two sources
//! - [`Resize`]: bilinear geometry change
//!
//! [`Yadif`] deinterlaces with a three-frame window per source.

pub mod combine;
pub mod mix;
pub mod process;
pub mod resize;
pub mod transform;
pub mod transition;
pub mod view;
pub mod wipe;
pub mod yadif;

pub use combine::{Combine, CombineParams};
pub use mix::{Mix, MixParams};
pub use process::{release_all, ImageProcess};
pub use resize::{Resize, ResizeGeometry, ResizeParams};
pub use transform::{Transform, TransformJob, TransformParams};
pub use transition::{Transition, TransitionParams, TransitionType};
pub use view::{Edge, ImageView, Pixel};
pub use wipe::{Wipe, WipeParams};
pub use yadif::{FieldOrder, Yadif, YadifMode};
