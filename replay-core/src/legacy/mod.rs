pub mod staggered;
