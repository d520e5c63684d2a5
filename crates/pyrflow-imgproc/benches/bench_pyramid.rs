use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use pyrflow_device::{DeviceConfig, ExecutionGraph, ProfileRecorder, ResidencyConfig};
use pyrflow_image::Image;
use pyrflow_imgproc::pyramid::PyramidBuilder;
use pyrflow_imgproc::{Program, ProgramSource};

fn bench_pyramid(c: &mut Criterion) {
    let mut group = c.benchmark_group("Pyramid Operations");

    let graph = ExecutionGraph::new(DeviceConfig::default()).unwrap();
    let program = Program::build(ProgramSource::default()).unwrap();
    let residency = ResidencyConfig::default();

    for (width, height) in [(256, 224), (512, 448), (1024, 896)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{}x{}", width, height);

        let image_size = [*width, *height].into();
        let image = Image::<u8, 1>::from_fn(image_size, |x, y| [((x ^ y) & 0xff) as u8]);

        group.bench_with_input(
            BenchmarkId::new("pyramid_3_levels", &parameter_string),
            &image,
            |b, i| {
                b.iter(|| {
                    let mut recorder = ProfileRecorder::new();
                    let builder =
                        PyramidBuilder::allocate("Image 1", i.size(), 3, &residency).unwrap();
                    let pyramid = builder.build(&graph, &program, i, None, &mut recorder);
                    graph.drain().unwrap();
                    black_box(pyramid);
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_pyramid);
criterion_main!(benches);
