mod character;
mod run;
mod settings;
mod sync;

pub use character::*;
pub use run::*;
pub use settings::*;
pub use sync::*;
