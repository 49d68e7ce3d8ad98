pub mod chroma;
pub mod color;
pub mod colorspace;
pub mod device;
pub mod device_set;
pub mod enumeration;
pub mod float;
pub mod orientation;
pub mod param;

pub use color::{ColorMode, ColorParam};
pub use colorspace::{ReferenceWhite, RgbColorSpace};
pub use device::{Device, DeviceObserver};
pub use device_set::{DeviceSet, MetadataOp, NumOp};
pub use enumeration::{EnumInterp, EnumMode, EnumParam};
pub use float::FloatParam;
pub use orientation::{AngleUnit, OrientationParam};
pub use param::Param;
