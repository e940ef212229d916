use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use filterql::apply::compile_apply;
use filterql::lexer::Lexer;
use filterql::parser::{parse_apply, parse_filter, Parser};
use filterql::schema::{EntitySchema, NavigationDescriptor, ScalarType, SchemaRegistry};
use filterql::sql_compiler::SqlCompiler;
use filterql::{CompilerConfig, Dialect, ParserCache, QueryCompiler};
use std::hint::black_box;
use std::sync::Arc;

const FILTERS: [(&str, &str); 4] = [
    ("simple", "Name eq 'Milk'"),
    ("medium", "Price gt 5 and (tolower(Name) eq 'milk' or startswith(Name, 'Mi')) and Category/Name ne 'x'"),
    ("lambda", "Descriptions/any(d: d/LanguageKey eq 'EN' and contains(d/Text, 'fresh'))"),
    (
        "complex",
        "Descriptions/all(d: d/Language/Name ne 'German') and not (Price mul 2 lt 10) and year(CreatedAt) ge 2020",
    ),
];

const PIPELINES: [(&str, &str); 3] = [
    ("aggregate", "aggregate(Price with sum as Total, $count as N)"),
    ("groupby", "groupby((CategoryID),aggregate(Price with sum as Total))/filter(Total gt 100)"),
    (
        "compute_groupby",
        "filter(Price gt 1)/compute(Price mul 2 as Double)/groupby((Category/Name),aggregate(Double with max as Top))",
    ),
];

fn registry() -> SchemaRegistry {
    SchemaRegistry::new([
        EntitySchema::new("Product")
            .key("ID", ScalarType::Int)
            .property("Name", ScalarType::String)
            .property("Price", ScalarType::Decimal)
            .property("CategoryID", ScalarType::Int)
            .property("CreatedAt", ScalarType::DateTime)
            .navigation("Descriptions", NavigationDescriptor::many("Description", ["ProductID"]))
            .navigation("Category", NavigationDescriptor::single("Category", ["CategoryID"])),
        EntitySchema::new("Description")
            .key("ProductID", ScalarType::Int)
            .key("LanguageKey", ScalarType::String)
            .property("Text", ScalarType::String)
            .navigation(
                "Language",
                NavigationDescriptor::single("Language", ["LanguageKey"]).references(["Code"]),
            ),
        EntitySchema::new("Language")
            .key("ID", ScalarType::Int)
            .property("Code", ScalarType::String)
            .property("Name", ScalarType::String),
        EntitySchema::new("Category")
            .key("ID", ScalarType::Int)
            .property("Name", ScalarType::String),
    ])
}

fn benchmark_lexer(c: &mut Criterion) {
    let mut group = c.benchmark_group("lexer_performance");
    for (name, filter) in FILTERS {
        group.bench_with_input(BenchmarkId::new("tokenize", name), &filter, |b, &filter| {
            b.iter(|| {
                let tokens: Vec<_> = Lexer::new(black_box(filter)).collect();
                black_box(tokens)
            })
        });
    }
    group.finish();
}

fn benchmark_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_performance");
    for (name, filter) in FILTERS {
        let tokens = filterql::lexer::tokenize(filter).unwrap();
        group.bench_with_input(BenchmarkId::new("parse", name), &tokens, |b, tokens| {
            b.iter(|| {
                let mut parser = Parser::new(filter, black_box(tokens));
                black_box(parser.parse().unwrap())
            })
        });
    }
    group.finish();
}

fn benchmark_filter_compiler(c: &mut Criterion) {
    let registry = registry();
    let cache = ParserCache::new();
    let mut group = c.benchmark_group("filter_compiler_performance");
    for dialect in [Dialect::Sqlite, Dialect::Postgres] {
        for (name, filter) in FILTERS {
            let expr = parse_filter(filter).unwrap();
            group.bench_with_input(BenchmarkId::new(dialect.to_string(), name), &expr, |b, expr| {
                b.iter(|| {
                    let mut compiler = SqlCompiler::new(&registry, &cache, dialect, "Product").unwrap();
                    let fragment = compiler.compile_predicate(black_box(expr)).unwrap();
                    black_box(fragment.render(dialect))
                })
            });
        }
    }
    group.finish();
}

fn benchmark_apply(c: &mut Criterion) {
    let registry = registry();
    let cache = ParserCache::new();
    let mut group = c.benchmark_group("apply_performance");
    for (name, pipeline) in PIPELINES {
        let transformations = parse_apply(pipeline).unwrap();
        group.bench_with_input(BenchmarkId::new("compile_apply", name), &transformations, |b, steps| {
            b.iter(|| {
                let mut compiler = SqlCompiler::new(&registry, &cache, Dialect::Postgres, "Product").unwrap();
                black_box(compile_apply(&mut compiler, black_box(steps)).unwrap())
            })
        });
    }
    group.finish();
}

fn benchmark_end_to_end(c: &mut Criterion) {
    let compiler = QueryCompiler::new(Arc::new(registry()), CompilerConfig::default());
    let params = [
        ("$filter", "Descriptions/any(d: d/LanguageKey eq @lang) and Price gt 5"),
        ("$orderby", "Category/Name desc, Price"),
        ("$expand", "Category($select=Name)"),
        ("$top", "20"),
        ("@lang", "'EN'"),
    ];
    c.bench_function("query_compile", |b| {
        b.iter(|| black_box(compiler.compile_params("Product", black_box(params)).unwrap().to_sql()))
    });
}

criterion_group!(
    benches,
    benchmark_lexer,
    benchmark_parser,
    benchmark_filter_compiler,
    benchmark_apply,
    benchmark_end_to_end
);
criterion_main!(benches);
