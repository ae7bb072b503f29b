use std::sync::Arc;

use apollo_jit::Compiler;
use apollo_jit::QueryCache;
use apollo_jit::Request;
use apollo_jit::ResolvedValue;
use apollo_jit::Schema;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use serde_json_bytes::Value;
use serde_json_bytes::json;

const SDL: &str = r#"
    type Query {
        products(first: Int = 50): [Product!]!
    }
    type Product {
        id: ID!
        name: String
        price: Float
        tags: [String!]!
    }
"#;

const QUERY: &str = r#"
    query Products($first: Int) {
        products(first: $first) {
            id
            name
            price
            tags
        }
    }
"#;

fn schema() -> Arc<Schema> {
    let schema = Schema::builder(SDL)
        .resolver("Query", "products", |info| {
            let first = info
                .argument("first")
                .and_then(Value::as_i64)
                .unwrap_or_default();
            Ok(ResolvedValue::list((0..first).map(|id| {
                ResolvedValue::leaf(json!({
                    "id": id,
                    "name": format!("product {id}"),
                    "price": id as f64 * 1.5,
                    "tags": ["a", "b"],
                }))
            })))
        })
        .build()
        .unwrap();
    Arc::new(schema)
}

fn request() -> Request {
    Request::builder().variable("first", 100).build()
}

fn from_elem(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution");

    let uncached = Compiler::new(schema());
    group.bench_function("compile_per_request", |b| {
        b.iter(|| {
            let plan = uncached.compile(QUERY, None).unwrap();
            plan.execute_sync(request()).unwrap()
        })
    });

    let cached = Compiler::with_cache(schema(), QueryCache::new(16, None).unwrap());
    group.bench_function("cached_plan", |b| {
        b.iter(|| {
            let plan = cached.compile(QUERY, None).unwrap();
            plan.execute_sync(request()).unwrap()
        })
    });

    let plan = cached.compile(QUERY, None).unwrap();
    group.bench_function("execute_only", |b| {
        b.iter(|| plan.execute_sync(request()).unwrap())
    });

    let runtime = tokio::runtime::Runtime::new().unwrap();
    group.bench_function("execute_only_async", |b| {
        b.to_async(&runtime)
            .iter(|| async { plan.execute(request()).await.unwrap() })
    });

    group.finish();
}

criterion_group!(benches, from_elem);
criterion_main!(benches);
