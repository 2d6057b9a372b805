mod augment;
mod dataset;
mod encoder;
mod midi_importer;
mod model;
mod piece;
mod store;
mod tensor;
mod vocab;
mod window;

pub use augment::*;
pub use dataset::*;
pub use encoder::*;
pub use midi_importer::*;
pub use model::config::*;
pub use model::event::*;
pub use model::music::*;
pub use piece::*;
pub use store::*;
pub use tensor::*;
pub use vocab::*;
pub use window::*;
