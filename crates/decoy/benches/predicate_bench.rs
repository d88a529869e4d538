use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use decoy::config::Mode;
use decoy::predicate::{all_match, parse_all, EvalContext, ParseOptions, Predicate};
use decoy::request::Request;
use serde_json::{json, Map, Value};

fn request(path: &str, body: &str) -> Value {
    let mut headers = Map::new();
    headers.insert("Content-Type".to_string(), json!("application/json"));
    let mut query = Map::new();
    query.insert("page".to_string(), json!("2"));
    Request::http("127.0.0.1:5000", "POST", path, query, headers, body).to_value()
}

fn parse(definitions: Value) -> Vec<Predicate> {
    let definitions = definitions.as_array().cloned().unwrap_or_default();
    parse_all(&definitions, &ParseOptions::default()).unwrap()
}

fn bench_operators(c: &mut Criterion) {
    let mut group = c.benchmark_group("operators");
    let state = decoy::new_state();
    let ctx = EvalContext {
        mode: Mode::Text,
        dry_run: false,
        state: &state,
    };
    let request = request("/api/v1/orders/42", r#"{"order": {"id": 42, "items": ["a", "b"]}}"#);

    let cases = [
        ("equals", json!([{"equals": {"method": "POST", "path": "/api/v1/orders/42"}}])),
        ("deepEquals", json!([{"deepEquals": {"query": {"page": "2"}}}])),
        ("contains", json!([{"contains": {"body": "items"}}])),
        ("matches", json!([{"matches": {"path": "^/api/v\\d+/orders/\\d+$"}}])),
        ("exists", json!([{"exists": {"headers": {"content-type": true}}}])),
        (
            "jsonpath",
            json!([{"equals": {"body": "42"}, "jsonpath": {"selector": "$.order.id"}}]),
        ),
        (
            "and_or_not",
            json!([{"and": [
                {"startsWith": {"path": "/api"}},
                {"or": [{"equals": {"method": "GET"}}, {"equals": {"method": "POST"}}]},
                {"not": {"endsWith": {"path": "/99"}}}
            ]}]),
        ),
    ];

    group.throughput(Throughput::Elements(1));
    for (name, definitions) in cases {
        let predicates = parse(definitions);
        group.bench_function(name, |b| {
            b.iter(|| all_match(black_box(&predicates), black_box(&request), &ctx).unwrap())
        });
    }
    group.finish();
}

fn bench_stub_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("stub_scan");
    let state = decoy::new_state();
    let ctx = EvalContext {
        mode: Mode::Text,
        dry_run: false,
        state: &state,
    };

    for stub_count in [10, 100, 1000].iter() {
        let stubs: Vec<Vec<Predicate>> = (0..*stub_count)
            .map(|i| parse(json!([{"equals": {"path": format!("/api/v1/endpoint{i}")}}])))
            .collect();
        let last = request(&format!("/api/v1/endpoint{}", stub_count - 1), "");

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("match_last", stub_count), stub_count, |b, _| {
            b.iter(|| {
                stubs
                    .iter()
                    .position(|predicates| all_match(predicates, black_box(&last), &ctx).unwrap_or(false))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_operators, bench_stub_scan);
criterion_main!(benches);
