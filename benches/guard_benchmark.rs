use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use storefront_auth::config::Config;
use storefront_auth::models::{Role, User};
use storefront_auth::services::route_guard::login_url;
use storefront_auth::services::{decide, AuthPhase, AuthSnapshot, Requirement, RoleState};

fn benchmark_guard(c: &mut Criterion) {
    let user = User {
        id: "6f1c2a4e-0000-4000-8000-00000000a001".to_string(),
        email: Some("owner@fixit.example".to_string()),
        email_confirmed_at: None,
    };
    let resolved = AuthSnapshot::from_parts(
        AuthPhase::Resolved,
        Some(user.clone()),
        RoleState::Resolved(Some(Role::User)),
    );
    let pending = AuthSnapshot::from_parts(AuthPhase::RolePending, Some(user), RoleState::Unknown);
    let admin = Requirement::Role(Role::Admin);

    let mut group = c.benchmark_group("route_guard");

    group.bench_function("decide_resolved_non_admin", |b| {
        b.iter(|| decide(black_box(&resolved), black_box(&admin)))
    });

    group.bench_function("decide_role_pending", |b| {
        b.iter(|| decide(black_box(&pending), black_box(&admin)))
    });

    group.finish();
}

fn benchmark_edge_matching(c: &mut Criterion) {
    let config = Config::test_default();

    let mut group = c.benchmark_group("edge_guard");

    group.bench_function("is_protected_deep_admin_path", |b| {
        b.iter(|| config.is_protected(black_box("/admin/repairs/4812/parts")))
    });

    group.bench_function("is_protected_public_path", |b| {
        b.iter(|| config.is_protected(black_box("/shop/phones/refurbished")))
    });

    group.bench_function("login_url", |b| {
        b.iter(|| login_url(black_box("/admin/repairs/4812 notes")))
    });

    group.finish();
}

criterion_group!(benches, benchmark_guard, benchmark_edge_matching);
criterion_main!(benches);
