pub mod inspect;
pub mod package;
pub mod run;
