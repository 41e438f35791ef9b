#![allow(dead_code)]

use criterion::{criterion_group, criterion_main, Criterion};
use sprout::{Container, Definition, Registry};
use std::sync::Arc;

struct A(Arc<B>, Arc<C>);
struct B(i32);
struct C(Arc<CA>);
struct CA(Arc<CAA>);
struct CAA(Arc<CAAA>);
struct CAAA(Arc<CAAAA>);
struct CAAAA(Arc<CAAAAA>);
struct CAAAAA;

#[inline]
fn definitions(prototype: bool, finalizers: bool) -> Vec<Definition> {
    macro_rules! def {
        ($name:literal, $ty:ty, $inst:expr) => {{
            let builder = Definition::builder($name, $inst);
            let builder = if prototype { builder.prototype() } else { builder };
            let builder = if finalizers {
                builder.finalizer(|_: Arc<$ty>| -> anyhow::Result<()> { Ok(()) })
            } else {
                builder
            };
            builder.build()
        }};
    }

    vec![
        def!("caaaaa", CAAAAA, |_| Ok(Arc::new(CAAAAA))),
        def!("caaaa", CAAAA, |r| Ok(Arc::new(CAAAA(r.get_typed("caaaaa")?)))),
        def!("caaa", CAAA, |r| Ok(Arc::new(CAAA(r.get_typed("caaaa")?)))),
        def!("caa", CAA, |r| Ok(Arc::new(CAA(r.get_typed("caaa")?)))),
        def!("ca", CA, |r| Ok(Arc::new(CA(r.get_typed("caa")?)))),
        def!("c", C, |r| Ok(Arc::new(C(r.get_typed("ca")?)))),
        def!("b", B, |_| Ok(Arc::new(B(2)))),
        def!("a", A, |r| Ok(Arc::new(A(r.get_typed("b")?, r.get_typed("c")?)))),
    ]
}

#[inline]
fn container_new(prototype: bool, finalizers: bool) -> Container {
    definitions(prototype, finalizers)
        .into_iter()
        .fold(Container::builder(), |builder, definition| builder.definition(definition))
        .build()
}

#[inline]
fn container_refresh(container: Container) {
    container.refresh().unwrap();
}

#[inline]
fn container_get(container: &Container) {
    let _ = container.get_typed::<A>("a").unwrap();
}

#[inline]
fn container_refresh_and_close(finalizers: bool) {
    let container = container_new(false, finalizers);
    container.refresh().unwrap();
    container.close();
}

#[inline]
fn registry_get_or_create(registry: &Registry) {
    let _ = registry.get_or_create("b", || Ok(Arc::new(B(2)))).unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    let singletons = container_new(false, true);
    singletons.refresh().unwrap();
    let prototypes = container_new(true, false);
    prototypes.refresh().unwrap();
    let registry = Registry::new();

    c.bench_function("container_new", |b| b.iter(|| container_new(false, true)))
        .bench_function("container_refresh", |b| b.iter(|| container_refresh(container_new(false, true))))
        .bench_function("container_get_with_cache", |b| b.iter(|| container_get(&singletons)))
        .bench_function("container_get_prototype", |b| b.iter(|| container_get(&prototypes)))
        .bench_function("container_close", |b| b.iter(|| container_refresh_and_close(true)))
        .bench_function("container_close_without_finalizers", |b| {
            b.iter(|| container_refresh_and_close(false))
        })
        .bench_function("registry_get_or_create_with_cache", |b| {
            b.iter(|| registry_get_or_create(&registry))
        });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
