pub mod iobes;
pub mod space;

pub use iobes::{Prefix, Scheme, Tag, bio_to_iobes};
pub use space::{LabelSpace, START_TAG, STOP_TAG};
