use criterion::{black_box, criterion_group, criterion_main, Criterion};

use plotflow_raster::{GrayscaleBuffer, RgbTile};

fn bench_draw_line(c: &mut Criterion) {
    let mut buf = GrayscaleBuffer::new();
    c.bench_function("draw_line_diagonal", |b| {
        b.iter(|| {
            buf.draw_line(
                black_box(3.0),
                black_box(7.0),
                black_box(250.0),
                black_box(180.0),
                black_box(2.0),
            );
            buf.reset();
        })
    });

    c.bench_function("draw_line_steep", |b| {
        b.iter(|| {
            buf.draw_line(
                black_box(40.0),
                black_box(2.0),
                black_box(60.0),
                black_box(253.0),
                black_box(3.5),
            );
            buf.reset();
        })
    });
}

fn bench_draw_circle(c: &mut Criterion) {
    let mut buf = GrayscaleBuffer::new();
    c.bench_function("draw_circle_r4", |b| {
        b.iter(|| {
            buf.draw_circle(black_box(128.0), black_box(128.0), black_box(4.0));
            buf.reset();
        })
    });
}

fn bench_merge(c: &mut Criterion) {
    c.bench_function("merge_diagonal_line", |b| {
        let mut gray = GrayscaleBuffer::new();
        let mut tile = RgbTile::new(0xffffff);
        b.iter(|| {
            gray.draw_line(0.0, 0.0, 255.0, 200.0, 2.0);
            tile.merge(&mut gray, 1, black_box(0xffcc3344));
        })
    });
}

criterion_group!(benches, bench_draw_line, bench_draw_circle, bench_merge);
criterion_main!(benches);
