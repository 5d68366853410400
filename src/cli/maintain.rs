use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct RepairCommand {}

impl SubCommandExtend for RepairCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = opts.catalog().open().await?;
        let report = catalog.repair().await?;
        println!(
            "restored thumbnails: {}\nrestored persons: {}\nremoved orphans: {}",
            report.restored_thumbnails, report.restored_persons, report.removed_orphans
        );
        Ok(())
    }
}

#[derive(Parser, Debug, Clone)]
pub struct ResetCommand {
    /// 确认删除所有数据
    #[arg(long)]
    pub yes: bool,
}

impl SubCommandExtend for ResetCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        if !self.yes {
            anyhow::bail!("重置会删除所有数据，请使用 --yes 确认");
        }
        let catalog = opts.catalog().open().await?;
        catalog.reset().await?;
        info!("重置完成");
        Ok(())
    }
}
