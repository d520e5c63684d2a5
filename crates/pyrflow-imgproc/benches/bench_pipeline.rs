use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use pyrflow_device::{DeviceConfig, ExecutionStrategy};
use pyrflow_image::Image;
use pyrflow_imgproc::{OpticalFlowPipeline, PipelineConfig, Program, ProgramSource};

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("Optical Flow");
    group.sample_size(20);

    for (width, height) in [(160, 120), (320, 240), (640, 480)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{}x{}", width, height);
        let image_size = [*width, *height].into();
        let first = Image::<u8, 1>::from_fn(image_size, |x, y| [((x * 7 + y * 13) % 256) as u8]);
        let second =
            Image::<u8, 1>::from_fn(image_size, |x, y| [((x * 7 + y * 13 + 9) % 256) as u8]);

        for strategy in [ExecutionStrategy::Serial, ExecutionStrategy::ParallelRows] {
            let config = PipelineConfig {
                device: DeviceConfig {
                    num_threads: 0,
                    strategy,
                },
                ..Default::default()
            };
            let graph = config.create_graph().unwrap();
            let program = Program::build(ProgramSource::default()).unwrap();
            let pipeline = OpticalFlowPipeline::new(graph, program, config);

            group.bench_with_input(
                BenchmarkId::new(format!("{strategy:?}"), &parameter_string),
                &(&first, &second),
                |b, i| {
                    b.iter(|| {
                        black_box(pipeline.run(i.0, i.1)).unwrap();
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
