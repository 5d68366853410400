use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::error::CatalogError;
use crate::store::{Count, INDEXES, SCHEMA_VERSION};

#[derive(Parser, Debug, Clone)]
pub struct InfoCommand {
    /// 同时列出所有索引定义
    #[arg(long)]
    pub indexes: bool,
}

impl SubCommandExtend for InfoCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let catalog = opts.catalog().open().await?;

        println!("path:    {}", catalog.path().display());
        println!("mode:    {}", catalog.mode().as_str());
        match catalog.schema_version().await {
            Ok(version) => println!("schema:  v{} (current v{})", version, SCHEMA_VERSION),
            Err(CatalogError::NotOpen) => println!("schema:  -"),
            Err(e) => return Err(e.into()),
        }
        match catalog.count().await? {
            Count::Exact(n) => println!("records: {}", n),
            Count::Unbounded => println!("records: unbounded"),
        }

        if self.indexes {
            for def in INDEXES {
                println!(
                    "{}.{}\t{}\t{}",
                    def.collection.name(),
                    def.name,
                    def.key_path,
                    if def.unique { "unique" } else { "" }
                );
            }
        }
        Ok(())
    }
}
