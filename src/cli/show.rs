use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ThumbnailCommand {
    /// 图片路径
    pub image: String,
    /// 保存到文件，否则输出 data URL
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl SubCommandExtend for ThumbnailCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = opts.catalog().open().await?;
        let thumbnail = catalog
            .thumbnail(&self.image)
            .await?
            .ok_or_else(|| anyhow!("没有 {} 的缩略图", self.image))?;

        match &self.output {
            Some(file) => {
                tokio::fs::write(file, &thumbnail.data).await?;
                info!("已保存 {} ({}, {} 字节)", file.display(), thumbnail.mime, thumbnail.data.len());
            }
            None => println!("{}", thumbnail.to_data_url()),
        }
        Ok(())
    }
}

#[derive(Parser, Debug, Clone)]
pub struct PersonCommand {
    /// 图片路径
    pub image: String,
}

impl SubCommandExtend for PersonCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = opts.catalog().open().await?;
        let persons = catalog
            .person_set(&self.image)
            .await?
            .ok_or_else(|| anyhow!("没有 {} 的人物信息", self.image))?;
        println!("{}", serde_json::to_string_pretty(&persons.persons)?);
        Ok(())
    }
}
