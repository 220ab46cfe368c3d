use anyhow::{Context, Result, bail};

use drape::{
    GpuBackend, HeadlessGpu, ImageData, LoggingConfig, PageDescription, PlaneElement, Scene,
    SceneConfig, SceneEvent, WgpuBackend, init_logging,
};

/// Four slides sharing one displacement map, matched manually the way an
/// AJAX-navigated page does it.
const DEMO_PAGE: &str = r#"{
    "params": {
        "widthSegments": 10,
        "heightSegments": 10,
        "autoloadSources": false,
        "uniforms": {
            "timer": { "name": "uTransitionTimer", "type": "1f", "value": 0 }
        }
    },
    "planes": [
        { "id": "slide-1", "sources": [{ "src": "img/1.jpg" }, { "src": "img/map.jpg", "sampler": "uDisplacement" }] },
        { "id": "slide-2", "sources": [{ "src": "img/2.jpg" }, { "src": "img/map.jpg", "sampler": "uDisplacement" }] },
        { "id": "slide-3", "sources": [{ "src": "img/3.jpg" }, { "src": "img/map.jpg", "sampler": "uDisplacement" }] },
        { "id": "slide-4", "sources": [{ "src": "img/4.jpg" }, { "src": "img/map.jpg", "sampler": "uDisplacement" }] }
    ]
}"#;

const NEXT_PAGE: &[&str] = &["img/5.jpg", "img/6.jpg"];

fn placeholder(index: usize) -> ImageData {
    let shade = (40 * (index + 1)).min(255) as u8;
    ImageData::solid(8, 8, [shade, shade / 2, 255 - shade, 255])
}

fn log_events<G: GpuBackend + 'static>(scene: &mut Scene<G>) {
    for event in scene.drain_events() {
        match event {
            SceneEvent::ContextLossFatal { .. } | SceneEvent::ResourceUnavailable { .. } => {
                log::warn!("{event}")
            }
            _ => log::info!("{event}"),
        }
    }
}

/// Build the page, deliver its sources in reverse order, then run a slide
/// transition until it lands.
fn replay<G: GpuBackend + 'static>(scene: &mut Scene<G>, page: &PageDescription) -> Result<()> {
    for element in page.planes.iter().cloned() {
        let id = scene.add_plane(element, &page.params)?;
        scene.match_and_bind(id)?;
    }

    let sources = page.sources();
    for (index, source) in sources.iter().enumerate().rev() {
        scene.source_loaded(source, placeholder(index));
        scene.tick();
    }
    log_events(scene);

    let unbound: Vec<_> = scene.planes().filter(|p| !p.is_drawable()).collect();
    if !unbound.is_empty() {
        bail!("{} planes did not bind", unbound.len());
    }

    let first = scene.plane_ids().first().copied().context("page has no planes")?;
    scene.start_transition(first, "timer", 90.0, Some(0.04))?;
    let mut frames = 0;
    while scene.transitions().is_active(first) {
        scene.tick();
        frames += 1;
    }
    log::info!("slide transition settled after {frames} frames");
    log_events(scene);
    Ok(())
}

fn navigate<G: GpuBackend + 'static>(scene: &mut Scene<G>, page: &PageDescription) {
    let elements: Vec<PlaneElement> = NEXT_PAGE
        .iter()
        .enumerate()
        .map(|(i, src)| PlaneElement::new(format!("next-{i}")).source(*src))
        .collect();
    let mut params = page.params.clone();
    params.autoload_sources = true;

    scene.request_rebuild(elements, params);
    scene.tick();
    scene.content_transition_finished();
    for (index, source) in NEXT_PAGE.iter().enumerate() {
        scene.source_loaded(source, placeholder(index + 4));
    }
    scene.tick();
    log_events(scene);
}

fn run_headless(page: &PageDescription) -> Result<()> {
    let mut scene = Scene::new(HeadlessGpu::new(), SceneConfig::default());
    replay(&mut scene, page)?;

    log::info!("simulating context loss");
    scene.gpu_mut().lose_context();
    scene.tick();
    scene.handle_context_restored()?;
    scene.tick();
    log_events(&mut scene);

    navigate(&mut scene, page);

    scene.teardown();
    log::info!(
        "done: {} textures uploaded in total, {} still alive, {} invalid frees",
        scene.gpu().upload_log().len(),
        scene.gpu().live_textures(),
        scene.gpu().invalid_frees()
    );
    Ok(())
}

fn run_wgpu(gpu: WgpuBackend, page: &PageDescription) -> Result<()> {
    let mut scene = Scene::new(gpu, SceneConfig::default());
    replay(&mut scene, page)?;
    let queued = scene.gpu_mut().take_draw_queue();
    log::info!("wgpu backend queued {} draws", queued.len());
    navigate(&mut scene, page);
    scene.teardown();
    Ok(())
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let page = match args.iter().find(|a| !a.starts_with("--")) {
        Some(path) => PageDescription::from_json_file(path)
            .with_context(|| format!("reading page description {path}"))?,
        None => PageDescription::from_json_str(DEMO_PAGE)?,
    };

    if args.iter().any(|a| a == "--wgpu") {
        match WgpuBackend::new() {
            Ok(gpu) => return run_wgpu(gpu, &page),
            Err(err) => log::warn!("no wgpu device ({err}), using the headless backend"),
        }
    }
    run_headless(&page)
}
