pub mod helpers;

mod sync;
