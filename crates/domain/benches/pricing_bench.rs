use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Money, OperatorRegistry, PaymentMethod, RechargeRequest, quote};

fn request(country: &str, operator: &str, phone: &str, face: i64) -> RechargeRequest {
    RechargeRequest {
        origin_country: country.into(),
        phone_number: phone.into(),
        operator_id: operator.into(),
        face_amount: Money::from_minor(face),
        payment_method: PaymentMethod::Card,
    }
}

fn bench_quote_same_currency(c: &mut Criterion) {
    let registry = OperatorRegistry::builtin().unwrap();
    let req = request("BR", "NMHT", "3712-3456", 2500);

    c.bench_function("pricing/quote_brl", |b| {
        b.iter(|| quote(&registry, &req).unwrap());
    });
}

fn bench_quote_converted(c: &mut Criterion) {
    let registry = OperatorRegistry::builtin().unwrap();
    let req = request("FR", "D8DO", "(809) 555-1234", 1000);

    c.bench_function("pricing/quote_eur_to_brl", |b| {
        b.iter(|| quote(&registry, &req).unwrap());
    });
}

fn bench_registry_load(c: &mut Criterion) {
    let json = serde_json::to_string(&domain::RegistryConfig::builtin()).unwrap();

    c.bench_function("pricing/registry_from_json", |b| {
        b.iter(|| OperatorRegistry::from_json_str(&json).unwrap());
    });
}

criterion_group!(
    benches,
    bench_quote_same_currency,
    bench_quote_converted,
    bench_registry_load
);
criterion_main!(benches);
