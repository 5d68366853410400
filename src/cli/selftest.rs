use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, anyhow};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::store::{Count, QueryParams};
use crate::utils::read_records;

#[derive(Parser, Debug, Clone)]
pub struct SelftestCommand {
    /// 用于测试的记录文件
    pub path: PathBuf,
}

impl SubCommandExtend for SelftestCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let records = read_records(&self.path)?;
        let first = records.first().map(|r| r.key.clone()).ok_or_else(|| anyhow!("没有可用的记录"))?;
        let expected = records.len() as u64;

        let start = Instant::now();
        let catalog = opts.catalog().open().await?;
        info!("open:      {:.2}ms", start.elapsed().as_secs_f32() * 1000.);

        let start = Instant::now();
        catalog.reset().await?;
        info!("reset:     {:.2}ms", start.elapsed().as_secs_f32() * 1000.);

        let start = Instant::now();
        for outcome in catalog.store_many(records).await {
            outcome.into_result()?;
        }
        info!("store:     {:.2}ms", start.elapsed().as_secs_f32() * 1000.);

        let start = Instant::now();
        let count = catalog.count().await?;
        info!("count:     {:.2}ms", start.elapsed().as_secs_f32() * 1000.);
        if count != Count::Exact(expected) {
            return Err(anyhow!("记录数量不一致: {:?} != {}", count, expected));
        }

        let start = Instant::now();
        let all = catalog.query_all(QueryParams::default()).await?;
        info!("query:     {:.2}ms ({} 条)", start.elapsed().as_secs_f32() * 1000., all.len());

        let start = Instant::now();
        catalog.thumbnail(&first).await?;
        catalog.person_set(&first).await?;
        info!("retrieve:  {:.2}ms", start.elapsed().as_secs_f32() * 1000.);

        println!("ok");
        Ok(())
    }
}
