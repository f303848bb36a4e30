//! Analysis service: predictor + metrics + rendering + history

use ab_glyph::FontArc;
use image::{DynamicImage, RgbImage};
use metrics::counter;
use predictor::{
    BackendKind, ChangePredictor, Detection, DetectionPredictor, Predictor, PredictorError,
    PredictorInput, SegmentationPredictor, DEFAULT_SCORE_THRESHOLD,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{NewHistoryRecord, Repository};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::{land_cover, ChangeMetrics, DetectionMetrics, RoadMetrics, TaskMetrics};
use crate::render;
use crate::{AnalysisError, TaskType};

/// Where each task's model lives and how to run it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub backend: BackendKind,
    pub score_threshold: f32,
    pub object_detection_dir: PathBuf,
    pub road_extraction_dir: PathBuf,
    pub land_segmentation_dir: PathBuf,
    pub change_detection_dir: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            object_detection_dir: PathBuf::from("models/object_detection"),
            road_extraction_dir: PathBuf::from("models/road_extraction"),
            land_segmentation_dir: PathBuf::from("models/land_segmentation"),
            change_detection_dir: PathBuf::from("models/change_detection"),
        }
    }
}

impl ModelsConfig {
    pub fn dir(&self, task: TaskType) -> &Path {
        match task {
            TaskType::ObjectDetection => &self.object_detection_dir,
            TaskType::RoadExtraction => &self.road_extraction_dir,
            TaskType::LandSegmentation => &self.land_segmentation_dir,
            TaskType::ChangeDetection => &self.change_detection_dir,
        }
    }
}

/// The loaded predictor of each task; a task whose model failed to load has none
#[derive(Clone, Default)]
pub struct Predictors {
    by_task: BTreeMap<TaskType, Arc<dyn Predictor>>,
}

impl Predictors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every task's model. Failures are logged once and leave the task unavailable.
    pub fn load(config: &ModelsConfig) -> Self {
        let mut predictors = Self::new();
        for task in TaskType::ALL {
            let dir = config.dir(task);
            match load_predictor(task, dir, config) {
                Ok(predictor) => {
                    info!("Loaded {} model from {}", task, dir.display());
                    predictors.insert(task, predictor);
                }
                Err(e) => error!("Failed to load {} model from {}: {}", task, dir.display(), e),
            }
        }
        predictors
    }

    pub fn insert(&mut self, task: TaskType, predictor: Arc<dyn Predictor>) {
        self.by_task.insert(task, predictor);
    }

    pub fn with(mut self, task: TaskType, predictor: Arc<dyn Predictor>) -> Self {
        self.insert(task, predictor);
        self
    }

    pub fn get(&self, task: TaskType) -> Option<&Arc<dyn Predictor>> {
        self.by_task.get(&task)
    }

    /// Tasks with a usable model
    pub fn loaded(&self) -> Vec<TaskType> {
        self.by_task.keys().copied().collect()
    }
}

fn load_predictor(
    task: TaskType,
    dir: &Path,
    config: &ModelsConfig,
) -> Result<Arc<dyn Predictor>, PredictorError> {
    let name = task.as_str();
    Ok(match task {
        TaskType::ObjectDetection => Arc::new(
            DetectionPredictor::from_dir(name, dir, config.backend)?
                .with_score_threshold(config.score_threshold),
        ),
        TaskType::RoadExtraction | TaskType::LandSegmentation => {
            Arc::new(SegmentationPredictor::from_dir(name, dir, config.backend)?)
        }
        TaskType::ChangeDetection => Arc::new(ChangePredictor::from_dir(name, dir, config.backend)?),
    })
}

/// Output directories. Result URLs are relative to the static root's parent,
/// e.g. `static/output/<uuid>.png`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub static_root: PathBuf,
    pub result_dir: PathBuf,
    pub history_input_dir: PathBuf,
}

impl OutputPaths {
    /// `output/` and `history_inputs/` under the static root
    pub fn under(static_root: impl Into<PathBuf>) -> Self {
        let static_root = static_root.into();
        Self {
            result_dir: static_root.join("output"),
            history_input_dir: static_root.join("history_inputs"),
            static_root,
        }
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.result_dir).await?;
        tokio::fs::create_dir_all(&self.history_input_dir).await
    }

    /// URL path (no leading slash) under which a file in the static root is served
    pub fn public_url(&self, path: &Path) -> String {
        match path.strip_prefix(&self.static_root) {
            Ok(rest) => {
                let parts: Vec<_> = rest
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                format!("static/{}", parts.join("/"))
            }
            Err(_) => path.to_string_lossy().replace('\\', "/"),
        }
    }
}

/// Uniform result of every analysis
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub success: bool,
    pub result_url_relative: String,
    pub metrics: TaskMetrics,
    pub raw_results: Option<Vec<Detection>>,
    /// History row, when logging succeeded
    #[serde(skip)]
    pub history_id: Option<i64>,
}

/// Runs analyses against the loaded predictors
pub struct AnalysisService {
    predictors: Predictors,
    repository: Repository,
    paths: OutputPaths,
    font: Option<FontArc>,
}

impl AnalysisService {
    pub fn new(predictors: Predictors, repository: Repository, paths: OutputPaths) -> Self {
        Self {
            predictors,
            repository,
            paths,
            font: None,
        }
    }

    /// Label detection boxes with this font
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn predictors(&self) -> &Predictors {
        &self.predictors
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    /// Object detection, road extraction or land segmentation of one image file
    pub async fn analyze_image(
        &self,
        task: TaskType,
        image_path: &Path,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let result = self.run_single(task, image_path).await;
        record_request(task, &result);
        result
    }

    /// Change detection between two image files
    pub async fn analyze_pair(
        &self,
        before_path: &Path,
        after_path: &Path,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let result = self.run_pair(before_path, after_path).await;
        record_request(TaskType::ChangeDetection, &result);
        result
    }

    fn predictor(&self, task: TaskType) -> Result<Arc<dyn Predictor>, AnalysisError> {
        self.predictors
            .get(task)
            .cloned()
            .ok_or(AnalysisError::ModelUnavailable(task))
    }

    fn new_result_path(&self) -> PathBuf {
        self.paths.result_dir.join(format!("{}.png", Uuid::new_v4()))
    }

    async fn run_single(
        &self,
        task: TaskType,
        image_path: &Path,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        if task.is_pair() {
            return Err(AnalysisError::UnsupportedInput {
                task,
                input: "a single image",
            });
        }
        let predictor = self.predictor(task)?;
        ensure_image(image_path).await?;

        let result_path = self.new_result_path();
        let source = image_path.to_path_buf();
        let target = result_path.clone();
        let font = self.font.clone();

        let (metrics, raw_results) = tokio::task::spawn_blocking(move || {
            let image = image::open(&source)?.to_rgb8();
            let (metrics, raw_results, rendered) =
                analyze_single(task, predictor.as_ref(), image, font.as_ref())?;
            rendered.save(&target)?;
            Ok::<_, AnalysisError>((metrics, raw_results))
        })
        .await
        .map_err(|e| AnalysisError::Worker(e.to_string()))??;

        let result_url = self.paths.public_url(&result_path);
        let history_id = match self.archive_input(image_path).await {
            Some(input_url) => {
                self.record_history(task, &result_url, &input_url, None, &metrics)
                    .await
            }
            None => None,
        };

        info!("{} analysis of {} -> {}", task, image_path.display(), result_url);
        Ok(AnalysisOutcome {
            success: true,
            result_url_relative: result_url,
            metrics,
            raw_results,
            history_id,
        })
    }

    async fn run_pair(
        &self,
        before_path: &Path,
        after_path: &Path,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let task = TaskType::ChangeDetection;
        let predictor = self.predictor(task)?;
        ensure_image(before_path).await?;
        ensure_image(after_path).await?;

        let result_path = self.new_result_path();
        let (before, after) = (before_path.to_path_buf(), after_path.to_path_buf());
        let target = result_path.clone();

        let metrics = tokio::task::spawn_blocking(move || {
            let before = image::open(&before)?.to_rgb8();
            let after = image::open(&after)?.to_rgb8();
            let (metrics, rendered) = analyze_change(predictor.as_ref(), before, after)?;
            rendered.save(&target)?;
            Ok::<_, AnalysisError>(metrics)
        })
        .await
        .map_err(|e| AnalysisError::Worker(e.to_string()))??;

        let result_url = self.paths.public_url(&result_path);
        let before_url = self.archive_input(before_path).await;
        let after_url = self.archive_input(after_path).await;
        let history_id = match (before_url, after_url) {
            (Some(before_url), Some(after_url)) => {
                self.record_history(task, &result_url, &before_url, Some(&after_url), &metrics)
                    .await
            }
            _ => None,
        };

        info!(
            "{} analysis of {} / {} -> {}",
            task,
            before_path.display(),
            after_path.display(),
            result_url
        );
        Ok(AnalysisOutcome {
            success: true,
            result_url_relative: result_url,
            metrics,
            raw_results: None,
            history_id,
        })
    }

    /// Copy an input next to the results so history entries stay viewable
    async fn archive_input(&self, source: &Path) -> Option<String> {
        let file_name = source.file_name()?;
        let target = self.paths.history_input_dir.join(file_name);
        match tokio::fs::copy(source, &target).await {
            Ok(_) => Some(self.paths.public_url(&target)),
            Err(e) => {
                warn!("Failed to archive input {}: {}", source.display(), e);
                None
            }
        }
    }

    /// Append a history row; failures are logged and the analysis result is kept
    async fn record_history(
        &self,
        task: TaskType,
        result_url: &str,
        before_url: &str,
        after_url: Option<&str>,
        metrics: &TaskMetrics,
    ) -> Option<i64> {
        let record =
            match NewHistoryRecord::new(task.as_str(), result_url, before_url, after_url, metrics) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Failed to serialize {} history: {}", task, e);
                    return None;
                }
            };

        match self.repository.insert(&record).await {
            Ok(id) => {
                debug!("Recorded {} history entry {}", task, id);
                Some(id)
            }
            Err(e) => {
                warn!("Failed to record {} history: {}", task, e);
                None
            }
        }
    }
}

async fn ensure_image(path: &Path) -> Result<(), AnalysisError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(AnalysisError::ImageNotFound(path.display().to_string())),
    }
}

fn record_request<T>(task: TaskType, result: &Result<T, AnalysisError>) {
    let status = if result.is_ok() { "ok" } else { "error" };
    counter!("analysis_requests_total", "task" => task.as_str(), "status" => status).increment(1);
}

/// Predict, measure and render one image
fn analyze_single(
    task: TaskType,
    predictor: &dyn Predictor,
    image: RgbImage,
    font: Option<&FontArc>,
) -> Result<(TaskMetrics, Option<Vec<Detection>>, DynamicImage), AnalysisError> {
    match task {
        TaskType::ObjectDetection => {
            let mut canvas = image.clone();
            let detections = predictor
                .predict(&PredictorInput::Single(image))?
                .into_detections()?;
            render::draw_detections(&mut canvas, &detections, font);
            let metrics = DetectionMetrics::from_detections(&detections);
            Ok((
                TaskMetrics::Detection(metrics),
                Some(detections),
                DynamicImage::ImageRgb8(canvas),
            ))
        }
        TaskType::RoadExtraction => {
            let labels = predictor
                .predict(&PredictorInput::Single(image))?
                .into_label_map()?;
            Ok((
                TaskMetrics::Road(RoadMetrics::from_label_map(&labels)),
                None,
                DynamicImage::ImageLuma8(render::binary_mask(&labels)),
            ))
        }
        TaskType::LandSegmentation => {
            let labels = predictor
                .predict(&PredictorInput::Single(image))?
                .into_label_map()?;
            Ok((
                TaskMetrics::LandCover(land_cover(&labels)),
                None,
                DynamicImage::ImageRgba8(render::land_cover_overlay(&labels)),
            ))
        }
        TaskType::ChangeDetection => Err(AnalysisError::UnsupportedInput {
            task,
            input: "a single image",
        }),
    }
}

fn analyze_change(
    predictor: &dyn Predictor,
    before: RgbImage,
    after: RgbImage,
) -> Result<(TaskMetrics, DynamicImage), AnalysisError> {
    let changes = predictor
        .predict(&PredictorInput::Pair(before, after))?
        .into_label_map()?;
    Ok((
        TaskMetrics::Change(ChangeMetrics::from_change_map(&changes)),
        DynamicImage::ImageLuma8(render::binary_mask(&changes)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::ArrayD;
    use predictor::{LabelMap, PredictionResult, PredictorKind, Prepared};
    use tempfile::TempDir;

    /// Returns a canned result for any input
    struct StubPredictor {
        kind: PredictorKind,
        result: PredictionResult,
    }

    impl Predictor for StubPredictor {
        fn name(&self) -> &str {
            "stub"
        }

        fn kind(&self) -> PredictorKind {
            self.kind
        }

        fn preprocess(&self, input: &PredictorInput) -> Result<Prepared, PredictorError> {
            Ok(Prepared {
                inputs: Vec::new(),
                original_size: input.dimensions(),
                input_size: input.dimensions(),
            })
        }

        fn infer(&self, _prepared: &Prepared) -> Result<Vec<ArrayD<f32>>, PredictorError> {
            Ok(Vec::new())
        }

        fn postprocess(
            &self,
            _outputs: Vec<ArrayD<f32>>,
            _prepared: &Prepared,
        ) -> Result<PredictionResult, PredictorError> {
            Ok(self.result.clone())
        }
    }

    fn stub(kind: PredictorKind, result: PredictionResult) -> Arc<dyn Predictor> {
        Arc::new(StubPredictor { kind, result })
    }

    async fn service(predictors: Predictors) -> (AnalysisService, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = OutputPaths::under(dir.path().join("static"));
        paths.ensure_dirs().await.unwrap();
        let repository = Repository::in_memory().await.unwrap();
        (AnalysisService::new(predictors, repository, paths), dir)
    }

    fn write_image(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join(name);
        RgbImage::from_pixel(width, height, Rgb([40, 80, 120]))
            .save(&path)
            .unwrap();
        path
    }

    fn result_file(service: &AnalysisService, outcome: &AnalysisOutcome) -> PathBuf {
        let name = outcome
            .result_url_relative
            .strip_prefix("static/output/")
            .unwrap();
        service.paths().result_dir.join(name)
    }

    #[tokio::test]
    async fn test_land_segmentation_metrics_and_history() {
        let labels = LabelMap::from_fn(64, 32, |x, _| (x % 8) as u8);
        let predictors = Predictors::new().with(
            TaskType::LandSegmentation,
            stub(PredictorKind::Segmentation, PredictionResult::LabelMap(labels)),
        );
        let (service, dir) = service(predictors).await;
        let input = write_image(&dir, "mosaic.png", 64, 32);

        let outcome = service
            .analyze_image(TaskType::LandSegmentation, &input)
            .await
            .unwrap();

        let TaskMetrics::LandCover(entries) = &outcome.metrics else {
            panic!("expected land cover metrics");
        };
        assert_eq!(entries.len(), 6);
        let ids: Vec<u8> = entries.iter().map(|e| e.class_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        for entry in entries {
            assert_eq!(entry.pixel_count, 256);
            assert_eq!(entry.area_m2, entry.pixel_count as f64 * 0.25);
        }
        let total: f64 = entries.iter().map(|e| e.percentage).sum();
        assert!(total <= 100.0);
        assert!(outcome.raw_results.is_none());

        let rendered = image::open(result_file(&service, &outcome)).unwrap();
        assert_eq!((rendered.width(), rendered.height()), (64, 32));
        assert_eq!(rendered.color(), image::ColorType::Rgba8);

        let record = service
            .repository()
            .get(outcome.history_id.unwrap())
            .await
            .unwrap();
        assert_eq!(record.task_type, "land_segmentation");
        assert_eq!(record.result_url, outcome.result_url_relative);
        assert_eq!(record.before_image_url, "static/history_inputs/mosaic.png");
        assert!(service.paths().history_input_dir.join("mosaic.png").exists());
    }

    #[tokio::test]
    async fn test_object_detection_envelope() {
        let detections = vec![
            Detection {
                class_id: 0,
                class_name: "aircraft".to_string(),
                score: 0.9,
                bbox: [2.0, 2.0, 10.0, 10.0],
            },
            Detection {
                class_id: 1,
                class_name: "oiltank".to_string(),
                score: 0.7,
                bbox: [20.0, 5.0, 6.0, 6.0],
            },
        ];
        let predictors = Predictors::new().with(
            TaskType::ObjectDetection,
            stub(PredictorKind::Detection, PredictionResult::Detections(detections)),
        );
        let (service, dir) = service(predictors).await;
        let input = write_image(&dir, "scene.png", 40, 30);

        let outcome = service
            .analyze_image(TaskType::ObjectDetection, &input)
            .await
            .unwrap();

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["metrics"]["total_detections"], 2);
        assert_eq!(json["metrics"]["count_by_class"]["oiltank"], 1);
        assert_eq!(json["raw_results"][0]["category"], "aircraft");
        assert!(json.get("history_id").is_none());

        let rendered = image::open(result_file(&service, &outcome)).unwrap().to_rgb8();
        assert_eq!(*rendered.get_pixel(2, 2), Rgb([0, 255, 0]));
        assert_eq!(*rendered.get_pixel(30, 25), Rgb([40, 80, 120]));
    }

    #[tokio::test]
    async fn test_road_extraction_mask() {
        let labels = LabelMap::from_fn(50, 20, |_, y| u8::from(y == 10));
        let predictors = Predictors::new().with(
            TaskType::RoadExtraction,
            stub(PredictorKind::Segmentation, PredictionResult::LabelMap(labels)),
        );
        let (service, dir) = service(predictors).await;
        let input = write_image(&dir, "roads.png", 50, 20);

        let outcome = service
            .analyze_image(TaskType::RoadExtraction, &input)
            .await
            .unwrap();

        let TaskMetrics::Road(metrics) = &outcome.metrics else {
            panic!("expected road metrics");
        };
        assert_eq!(metrics.road_segment_count, 1);
        assert_eq!(metrics.road_coverage_percent, 5.0);
        assert_eq!(metrics.road_length_km, 0.025);

        let mask = image::open(result_file(&service, &outcome)).unwrap().to_luma8();
        assert_eq!(mask.get_pixel(3, 10)[0], 255);
        assert_eq!(mask.get_pixel(3, 0)[0], 0);
    }

    #[tokio::test]
    async fn test_change_detection_pair() {
        let changes = LabelMap::from_fn(20, 20, |x, _| u8::from(x < 5));
        let predictors = Predictors::new().with(
            TaskType::ChangeDetection,
            stub(PredictorKind::ChangeDetection, PredictionResult::LabelMap(changes)),
        );
        let (service, dir) = service(predictors).await;
        let before = write_image(&dir, "before.png", 20, 20);
        let after = write_image(&dir, "after.png", 20, 20);

        let outcome = service.analyze_pair(&before, &after).await.unwrap();

        let TaskMetrics::Change(metrics) = &outcome.metrics else {
            panic!("expected change metrics");
        };
        assert_eq!(metrics.change_rate_percent, 25.0);
        assert_eq!(metrics.change_area_km2, 0.0);

        let record = service
            .repository()
            .get(outcome.history_id.unwrap())
            .await
            .unwrap();
        assert_eq!(
            record.after_image_url.as_deref(),
            Some("static/history_inputs/after.png")
        );
    }

    #[tokio::test]
    async fn test_missing_model_is_unavailable() {
        let (service, dir) = service(Predictors::new()).await;
        let input = write_image(&dir, "scene.png", 8, 8);

        let result = service.analyze_image(TaskType::RoadExtraction, &input).await;
        assert!(matches!(
            result,
            Err(AnalysisError::ModelUnavailable(TaskType::RoadExtraction))
        ));

        let written = std::fs::read_dir(&service.paths().result_dir).unwrap().count();
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn test_missing_image() {
        let predictors = Predictors::new().with(
            TaskType::RoadExtraction,
            stub(
                PredictorKind::Segmentation,
                PredictionResult::LabelMap(LabelMap::from_fn(1, 1, |_, _| 0)),
            ),
        );
        let (service, dir) = service(predictors).await;

        let result = service
            .analyze_image(TaskType::RoadExtraction, &dir.path().join("absent.png"))
            .await;
        assert!(matches!(result, Err(AnalysisError::ImageNotFound(_))));
    }

    #[tokio::test]
    async fn test_change_detection_needs_pair() {
        let (service, dir) = service(Predictors::new()).await;
        let input = write_image(&dir, "scene.png", 8, 8);

        let result = service.analyze_image(TaskType::ChangeDetection, &input).await;
        assert!(matches!(result, Err(AnalysisError::UnsupportedInput { .. })));
    }

    #[tokio::test]
    async fn test_history_failure_keeps_result() {
        let labels = LabelMap::from_fn(16, 16, |_, _| 4);
        let predictors = Predictors::new().with(
            TaskType::LandSegmentation,
            stub(PredictorKind::Segmentation, PredictionResult::LabelMap(labels)),
        );
        let (service, dir) = service(predictors).await;
        service.repository().close().await;
        let input = write_image(&dir, "scene.png", 16, 16);

        let outcome = service
            .analyze_image(TaskType::LandSegmentation, &input)
            .await
            .unwrap();

        assert!(outcome.history_id.is_none());
        assert!(result_file(&service, &outcome).exists());
    }

    #[test]
    fn test_load_without_models() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelsConfig {
            object_detection_dir: dir.path().join("od"),
            road_extraction_dir: dir.path().join("road"),
            land_segmentation_dir: dir.path().join("land"),
            change_detection_dir: dir.path().join("cd"),
            ..ModelsConfig::default()
        };

        let predictors = Predictors::load(&config);
        assert!(predictors.loaded().is_empty());
        assert!(predictors.get(TaskType::ObjectDetection).is_none());
    }

    #[test]
    fn test_public_url() {
        let paths = OutputPaths::under("data/static");
        assert_eq!(
            paths.public_url(&paths.result_dir.join("a.png")),
            "static/output/a.png"
        );
        assert_eq!(paths.public_url(Path::new("elsewhere/b.png")), "elsewhere/b.png");
    }
}
