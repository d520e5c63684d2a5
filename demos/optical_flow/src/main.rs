use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use argh::FromArgs;
use pyrflow::{
    device::{write_profile_table, ScopedTimer},
    image::Image,
    imgproc::{OpticalFlowPipeline, PipelineConfig, Program, ProgramSource},
};

/// Computes the dense optical flow between two frames
#[derive(FromArgs)]
struct Args {
    /// path to the first frame
    #[argh(option, short = 'a')]
    first: PathBuf,

    /// path to the second frame
    #[argh(option, short = 'b')]
    second: PathBuf,

    /// number of pyramid levels, overrides the config file
    #[argh(option, short = 'l')]
    levels: Option<usize>,

    /// path of the profile table
    #[argh(option, short = 'p', default = "PathBuf::from(\"profile.csv\")")]
    profile: PathBuf,

    /// directory receiving the pyramid levels and the flow field
    #[argh(option, short = 'o')]
    output_dir: Option<PathBuf>,

    /// pipeline configuration in JSON
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// kernel coefficients in JSON, defaults to the binomial downfilter and Sobel taps
    #[argh(option, short = 's')]
    program: Option<PathBuf>,
}

fn read_gray(path: &Path) -> Result<Image<u8, 1>, Box<dyn std::error::Error>> {
    let _timer = ScopedTimer::new(format!("Decode {}", path.display()));
    let gray = image::open(path)?.to_luma8();
    let size = [gray.width() as usize, gray.height() as usize].into();
    Ok(Image::new(size, gray.into_raw())?)
}

fn write_gray(path: &Path, img: &Image<u8, 1>) -> Result<(), Box<dyn std::error::Error>> {
    let buffer = image::GrayImage::from_raw(
        img.width() as u32,
        img.height() as u32,
        img.as_slice().to_vec(),
    )
    .ok_or("image buffer does not match its size")?;
    buffer.save(path)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => serde_json::from_reader(File::open(path)?)?,
        None => PipelineConfig::default(),
    };
    if let Some(levels) = args.levels {
        config.levels = levels;
    }

    let first = read_gray(&args.first)?;
    let second = read_gray(&args.second)?;
    log::info!(
        "first frame: {}x{}, second frame: {}x{}, {} levels",
        first.width(),
        first.height(),
        second.width(),
        second.height(),
        config.levels
    );

    let source: ProgramSource = match &args.program {
        Some(path) => serde_json::from_reader(File::open(path)?)?,
        None => ProgramSource::default(),
    };
    let program = Program::build(source)?;
    let graph = config.create_graph()?;
    let pipeline = OpticalFlowPipeline::new(graph, program, config);

    let output = pipeline.run(&first, &second)?;

    write_profile_table(output.profile(), BufWriter::new(File::create(&args.profile)?))?;
    log::info!(
        "wrote {} profile rows to {}, max counter: {} ns",
        output.profile().len(),
        args.profile.display(),
        output.span()
    );

    if let Some(dir) = &args.output_dir {
        let _timer = ScopedTimer::new("Export");
        std::fs::create_dir_all(dir)?;

        for (k, pyramid) in [output.first_pyramid(), output.second_pyramid()]
            .into_iter()
            .enumerate()
        {
            for (i, level) in pyramid.iter().enumerate() {
                let host = level.read_back(pipeline.graph())?;
                write_gray(&dir.join(format!("image{}_level{i}.png", k + 1)), &host)?;
            }
        }

        let flow = output.read_flow(pipeline.graph())?;
        let bytes = flow
            .as_slice()
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<_>>();
        std::fs::write(dir.join("flow_level0.f32"), bytes)?;
        log::info!(
            "exported {}x{} flow field to {}",
            flow.width(),
            flow.height(),
            dir.display()
        );
    }

    println!(
        "flow computed in {:.3} ms ({} device operations)",
        output.elapsed().as_secs_f64() * 1e3,
        output.profile().len()
    );

    Ok(())
}
