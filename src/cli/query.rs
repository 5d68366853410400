use std::convert::Infallible;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::error;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::error::CatalogError;
use crate::model::{Record, TagFilter};
use crate::store::{Direction, IndexName, QueryParams};

#[derive(Parser, Debug, Clone)]
pub struct QueryCommand {
    /// 排序使用的索引
    #[arg(short, long, value_enum, default_value_t = IndexName::Date)]
    pub index: IndexName,
    /// 排序方向
    #[arg(short, long, value_enum, default_value_t = Direction::Ascending)]
    pub direction: Direction,
    /// 第一条记录的序号，从 1 开始
    #[arg(long, default_value_t = 1)]
    pub start: usize,
    /// 最后一条记录的序号（包含）
    #[arg(long, default_value_t = usize::MAX)]
    pub end: usize,
    /// 标签过滤，例：--tag category=cat
    #[arg(short, long, value_name = "KEY=VALUE")]
    pub tag: Option<TagFilter>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
    /// 查询结束后向 stderr 输出 prometheus 指标
    #[arg(long)]
    pub metrics: bool,
}

impl QueryCommand {
    pub fn params(&self) -> QueryParams {
        let params = QueryParams::new(self.index, self.direction).range(self.start, self.end);
        match &self.tag {
            Some(tag) => params.tag(tag.clone()),
            None => params,
        }
    }
}

impl SubCommandExtend for QueryCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = match opts.catalog().open().await {
            Ok(catalog) => catalog,
            // 存储打不开时按空结果处理
            Err(e @ CatalogError::Open { .. }) => {
                error!("{}", e);
                return print_result(&[], self);
            }
            Err(e) => return Err(e.into()),
        };

        let records = catalog.query_all(self.params()).await?;
        print_result(&records, self)?;

        if self.metrics {
            eprint!("{}", crate::gather_metrics());
        }
        Ok(())
    }
}

fn print_result(records: &[Record], opts: &QueryCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(records)?)
        }
        OutputFormat::Table => {
            for record in records {
                println!("{:.0}\t{}\t{}", record.timestamp, record.size, record.key);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}

impl FromStr for OutputFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            _ => Ok(Self::Table),
        }
    }
}
