// Bio-entropy pipeline: header features -> stimulus -> seed -> starting points

mod features;
mod seed;
mod starting_points;
mod stimulus;

pub use features::{FEATURE_DIM, HeaderFeatures, leading_hex_zeros, normalized_bytes, shannon_entropy};
pub use seed::{EntropySeed, synthesise};
pub use starting_points::{DEFAULT_STARTING_POINTS, DEFAULT_WINDOW, StartingPoints, Strategy};
pub use stimulus::{ELECTRODE_COUNT, Electrode, StimulusPattern};
