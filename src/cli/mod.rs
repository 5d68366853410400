mod import;
mod info;
mod maintain;
mod query;
mod selftest;
mod show;

pub use import::*;
pub use info::*;
pub use maintain::*;
pub use query::*;
pub use selftest::*;
pub use show::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
