use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Aggregate, AggregateId, Cart, CustomerId, LineItem, Money};

fn sample_cart(lines: u32) -> Cart {
    let mut cart = Cart::new(AggregateId::new(), CustomerId::new());
    for i in 0..lines {
        cart.add_item(LineItem::new(
            AggregateId::new(),
            format!("SKU-{i:03}"),
            "Benchmark Widget",
            1,
            Money::from_cents(1000),
        ))
        .unwrap();
    }
    cart
}

fn bench_add_and_drain(c: &mut Criterion) {
    c.bench_function("domain/cart_add_10_and_drain", |b| {
        b.iter(|| {
            let mut cart = sample_cart(10);
            cart.drain_events()
        });
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let cart = sample_cart(50);

    c.bench_function("domain/cart_snapshot_50_lines", |b| {
        b.iter(|| serde_json::to_value(&cart).unwrap());
    });
}

criterion_group!(benches, bench_add_and_drain, bench_snapshot);
criterion_main!(benches);
