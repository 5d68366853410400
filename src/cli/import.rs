use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::utils::{json_files, pb_style, read_records};

#[derive(Parser, Debug, Clone)]
pub struct ImportCommand {
    /// JSON 文件或包含 JSON 文件的目录
    pub path: PathBuf,
    /// 每批写入的记录数
    #[arg(short, long, default_value_t = 64)]
    pub batch: usize,
    /// 导入完成后修复集合之间的不一致
    #[arg(long)]
    pub repair: bool,
}

impl SubCommandExtend for ImportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = opts.catalog().open().await?;

        let files = json_files(&self.path);
        if files.is_empty() {
            return Err(anyhow!("{} 中没有 JSON 文件", self.path.display()));
        }

        let mut records = vec![];
        for file in &files {
            records.extend(read_records(file)?);
        }
        info!("从 {} 个文件中读取到 {} 条记录", files.len(), records.len());

        let pb = ProgressBar::new(records.len() as u64).with_style(pb_style());
        let mut failed = 0;
        for chunk in records.chunks(self.batch.max(1)) {
            for outcome in catalog.store_many(chunk.to_vec()).await {
                if let Err(e) = outcome.into_result() {
                    pb.suspend(|| warn!("{}", e));
                    failed += 1;
                }
            }
            pb.inc(chunk.len() as u64);
        }
        pb.finish_with_message("导入完成");

        if failed > 0 {
            warn!("{} 条记录未能完整写入", failed);
        }
        if self.repair || failed > 0 {
            catalog.repair().await?;
        }
        Ok(())
    }
}
