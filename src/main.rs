use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use filterql::{CompilerConfig, Dialect, MetadataProvider, QueryCompiler, SchemaConfig};

const HELP: &str = "\
commands:
  <Entity>?<options>   compile query options, e.g. Product?$filter=Price gt 5&$top=10
  :dialect <name>      switch dialect (sqlite, postgres, mysql, sqlserver)
  :entities            list entities of the loaded schema
  :cache               show path cache statistics
  :help                show this text
  :quit                exit";

fn main() -> Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(schema_path) = args.next() else {
        bail!("usage: filterql <schema.json> [compiler.json]");
    };
    let schema = SchemaConfig::from_json_file(&schema_path)
        .and_then(SchemaConfig::into_registry)
        .with_context(|| format!("failed to load schema from {schema_path}"))?;
    let config = match args.next() {
        Some(path) => {
            CompilerConfig::from_json_file(&path).with_context(|| format!("failed to load compiler config from {path}"))?
        }
        None => CompilerConfig::default(),
    };

    let mut entities: Vec<String> = schema.entity_names().map(str::to_string).collect();
    entities.sort();
    let metadata: Arc<dyn MetadataProvider> = Arc::new(schema);
    let mut compiler = QueryCompiler::new(Arc::clone(&metadata), config);
    println!("filterql: {} entities, dialect {}. Type :help for commands.", entities.len(), config.dialect);

    let mut editor = DefaultEditor::new().context("failed to start line editor")?;
    loop {
        let line = match editor.readline("filterql> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("failed to read input"),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        match line.split_once(char::is_whitespace).unwrap_or((line, "")) {
            (":quit" | ":q", _) => break,
            (":help", _) => println!("{HELP}"),
            (":entities", _) => println!("{}", entities.join(", ")),
            (":cache", _) => {
                let stats = compiler.cache().stats();
                println!("hits {}, misses {}, entries {}", stats.hits, stats.misses, stats.entries);
            }
            (":dialect", name) => match name.trim().parse::<Dialect>() {
                Ok(dialect) => {
                    let config = CompilerConfig {
                        dialect,
                        ..*compiler.config()
                    };
                    compiler = QueryCompiler::with_cache(Arc::clone(&metadata), Arc::clone(compiler.shared_cache()), config);
                    println!("dialect: {dialect}");
                }
                Err(e) => println!("error: {e}"),
            },
            _ => compile_line(&compiler, line),
        }
    }
    Ok(())
}

/// `Entity?$filter=...&$orderby=...`
fn compile_line(compiler: &QueryCompiler, line: &str) {
    let (entity, query) = line.split_once('?').unwrap_or((line, ""));
    let params: Vec<(&str, &str)> = query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| part.split_once('=').unwrap_or((part, "")))
        .collect();

    match compiler.compile_params(entity.trim(), params) {
        Ok(compiled) => {
            let (sql, args) = compiled.to_sql();
            println!("{sql}");
            if !args.is_empty() {
                println!("args: {args:?}");
            }
            for expansion in &compiled.expansions {
                let (sql, args) = expansion.query.to_sql();
                println!("expand {} on {:?}:\n  {sql}", expansion.navigation, expansion.correlation);
                if !args.is_empty() {
                    println!("  args: {args:?}");
                }
            }
        }
        Err(e) => println!("error: {e}"),
    }
}
