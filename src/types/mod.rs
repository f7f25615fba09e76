pub mod bar;
pub mod instrument;
pub mod report;

pub use bar::*;
pub use instrument::*;
pub use report::*;
