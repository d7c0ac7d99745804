//! End-to-end runs of the pipeline driver against scripted collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use openrag_agent::llm::{ChatMessage, LlmClient, LlmError, OutputSchema};
use openrag_agent::stages::{filter_resolution, query_execution, query_planning, StageContext};
use openrag_agent::tools::{
    AnalyticsClient, AnalyticsError, Collaborators, FetchError, FetchedPage, PageFetcher,
    SearchClient, SearchHit,
};
use openrag_agent::Pipeline;
use openrag_core::audit::{AuditCategory, AuditContext, AuditEvent, InMemoryAuditSink};
use openrag_core::config::AppConfig;
use openrag_core::domain::chart::ChartQuery;
use openrag_core::domain::dataset::{ColumnCatalog, DatasetCatalog, DatasetRecord};
use openrag_core::domain::state::{ContentBlock, SharedState, StageResponse};
use openrag_core::errors::PipelineError;
use openrag_core::flows::PipelineStage;
use openrag_core::formats::AdminLevelTable;
use serde_json::{json, Value};

const QUESTION: &str = "人口最多的五個城市";

#[derive(Default)]
struct ScriptedLlm {
    texts: Mutex<VecDeque<String>>,
    structured: Mutex<VecDeque<Value>>,
    calls: AtomicUsize,
    last_images: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(texts: Vec<String>, structured: Vec<Value>) -> Self {
        Self {
            texts: Mutex::new(texts.into()),
            structured: Mutex::new(structured.into()),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_images(&self) -> Vec<String> {
        self.last_images.lock().expect("lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_images.lock().expect("lock") =
            messages.iter().flat_map(|message| message.images.clone()).collect();
        self.texts.lock().expect("lock").pop_front().ok_or(LlmError::EmptyAnswer)
    }

    async fn complete_structured(
        &self,
        _messages: &[ChatMessage],
        _schema: &OutputSchema,
    ) -> Result<Value, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.structured.lock().expect("lock").pop_front().ok_or(LlmError::EmptyAnswer)
    }
}

#[derive(Default)]
struct FakeAnalytics {
    searches: AtomicUsize,
    option_lookups: AtomicUsize,
    explores: AtomicUsize,
    column_requests: Mutex<Vec<String>>,
    failing_option_lookups: AtomicUsize,
    search_fails: bool,
    no_columns: bool,
    empty_explore: bool,
}

impl FakeAnalytics {
    fn column_requests(&self) -> Vec<String> {
        self.column_requests.lock().expect("lock").clone()
    }
}

fn population_rows() -> Value {
    json!([
        {"city": "新北市", "population": 4_004_367},
        {"city": "臺中市", "population": 2_852_031},
        {"city": "高雄市", "population": 2_737_257},
        {"city": "臺北市", "population": 2_500_620},
        {"city": "桃園市", "population": 2_322_210}
    ])
}

#[async_trait]
impl AnalyticsClient for FakeAnalytics {
    async fn search_tool(&self, _question: &str) -> Result<DatasetCatalog, AnalyticsError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.search_fails {
            return Err(AnalyticsError::Http { endpoint: "search", status: 503, body: "down".to_string() });
        }
        serde_json::from_value(json!({
            "d-pop": {"id": "d-pop", "name": "City population", "description": "Population by city"},
            "d-gdp": {"id": "d-gdp", "name": "City GDP", "description": "GDP by city"}
        }))
        .map_err(|error| AnalyticsError::Decode { endpoint: "search", message: error.to_string() })
    }

    async fn column_metadata_tool(
        &self,
        datasets: &[DatasetRecord],
    ) -> Result<ColumnCatalog, AnalyticsError> {
        self.column_requests
            .lock()
            .expect("lock")
            .extend(datasets.iter().map(|dataset| dataset.id.clone()));
        let mut catalog = ColumnCatalog::new();
        if self.no_columns {
            return Ok(catalog);
        }
        for dataset in datasets {
            let entry = serde_json::from_value(json!({
                "id": dataset.id,
                "name": dataset.name,
                "description": dataset.description,
                "columns": {
                    "c-year": {"name": "year", "type": "date"},
                    "c-city": {"name": "city", "type": "space"},
                    "c-pop": {"name": "population", "type": "integer"}
                }
            }))
            .map_err(|error| AnalyticsError::Decode { endpoint: "columns", message: error.to_string() })?;
            catalog.insert(dataset.id.clone(), entry);
        }
        Ok(catalog)
    }

    async fn filter_option_tool(&self, _charts: &mut Vec<ChartQuery>) -> Result<(), AnalyticsError> {
        self.option_lookups.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_option_lookups.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_option_lookups.store(failing - 1, Ordering::SeqCst);
            return Err(AnalyticsError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    async fn explore_tool(&self, charts: &mut Vec<ChartQuery>) -> Result<(), AnalyticsError> {
        self.explores.fetch_add(1, Ordering::SeqCst);
        if self.empty_explore {
            charts.clear();
            return Ok(());
        }
        for chart in charts.iter_mut() {
            chart.json_data = Some(population_rows());
            chart.image = Some("iVBORw0KGgo=".to_string());
        }
        Ok(())
    }
}

struct FakeSearch;

#[async_trait]
impl SearchClient for FakeSearch {
    async fn search(&self, _query: &str, count: u8) -> Result<Vec<SearchHit>, FetchError> {
        Ok((1..=count.min(2))
            .map(|index| SearchHit {
                title: format!("Population report {index}"),
                snippet: "Largest cities by population".to_string(),
                link: format!("https://news.example/{index}"),
            })
            .collect())
    }
}

struct FakeFetcher {
    fail: bool,
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if self.fail {
            return Err(FetchError::Transport { url: url.to_string(), message: "timed out".to_string() });
        }
        Ok(FetchedPage {
            status: 200,
            content_type: Some("text/html".to_string()),
            body: "<html><nav>menu</nav><article><p>New Taipei is the largest city.</p></article></html>"
                .to_string(),
        })
    }
}

fn chart_plan() -> String {
    let plan = json!({"charts": [{
        "id": "d-pop",
        "x": [
            {"columnID": "c-year", "format": "year"},
            {"columnID": "c-city", "format": "admin_level_4"}
        ],
        "y": [{"columnID": "c-pop", "calculation": "sum"}],
        "filter": []
    }]});
    format!("Plan first, then the JSON.\n```json\n{plan}\n```")
}

fn query_list() -> Value {
    json!({"querys": [{
        "id": "d-pop",
        "name": "City population",
        "x": [
            {"columnID": "c-year", "name": "year", "type": "date", "format": "year"},
            {"columnID": "c-city", "name": "city", "type": "space", "format": "admin_level_4"}
        ],
        "y": [{"columnID": "c-pop", "name": "population", "type": "integer", "calculation": "sum"}],
        "filter": []
    }]})
}

fn analytics_answers() -> Vec<Value> {
    vec![
        json!({"dataset_key": ["d-pop", "d-gdp"]}),
        query_list(),
        json!({"datasets": [{"id": "d-pop", "region": "TW", "language": "zh-TW"}]}),
        query_list(),
        query_list(),
    ]
}

fn planned_chart() -> ChartQuery {
    serde_json::from_value(json!({
        "id": "d-pop",
        "name": "City population",
        "x": [{"columnID": "c-year", "name": "year", "type": "date", "format": "year"}],
        "y": [{"columnID": "c-pop", "name": "population", "type": "integer", "calculation": "sum"}],
        "filter": [[{
            "columnID": "c-city", "name": "city", "type": "space",
            "format": "admin_level_4", "operator": "in", "value": ["臺北市"]
        }]]
    }))
    .expect("chart fixture")
}

/// A filter-value answer that echoes columns without their types.
fn filtered_query_list(space_format: &str) -> Value {
    json!({"querys": [{
        "id": "d-pop",
        "x": [{"columnID": "c-year", "format": "year"}],
        "y": [{"columnID": "c-pop", "calculation": "sum"}],
        "filter": [{"columnID": "c-city", "format": space_format, "operator": "in", "value": ["臺北市"]}]
    }]})
}

fn space_info() -> Value {
    json!({"datasets": [{"id": "d-pop", "region": "TW", "language": "zh-TW"}]})
}

fn state_with(response: StageResponse) -> SharedState {
    let mut state = SharedState::new(QUESTION, "zh-TW");
    state.response = Some(response);
    state
}

fn planned_state() -> SharedState {
    state_with(StageResponse::ChartQueries(vec![planned_chart()]))
}

fn failed_stage_event(sink: &InMemoryAuditSink) -> AuditEvent {
    sink.events()
        .into_iter()
        .find(|event| event.event_type == "pipeline.stage_failed")
        .expect("failure is audited")
}

fn web_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.search.enabled = true;
    config
}

fn audit() -> AuditContext {
    AuditContext::new("req-pipeline-test", "test")
}

#[tokio::test]
async fn full_route_answers_with_chart_data_and_web_context() {
    let llm = Arc::new(ScriptedLlm::new(
        vec![chart_plan(), "新北市人口最多。".to_string()],
        analytics_answers(),
    ));
    let analytics = Arc::new(FakeAnalytics::default());
    let sink = InMemoryAuditSink::default();
    let collaborators = Collaborators::new(llm.clone(), analytics.clone())
        .with_web(Arc::new(FakeSearch), Arc::new(FakeFetcher { fail: false }));

    let pipeline = Pipeline::new(web_config(), collaborators)
        .expect("pipeline")
        .with_audit_sink(Arc::new(sink.clone()));
    let state = pipeline
        .run(pipeline.new_state(QUESTION, None, None), &audit())
        .await
        .expect("pipeline completes");

    let answer = state.answer().expect("answer");
    assert_eq!(answer.json_data, population_rows());
    assert!(!answer.text_response.is_empty());
    assert_eq!(state.language, "zh-TW");

    let results = state.search_results();
    assert_eq!(results.len(), 2);
    assert!(matches!(&results[0], ContentBlock::Text(text)
        if text.starts_with("1. Population report 1") && text.contains("New Taipei is the largest city.")
            && !text.contains("menu")));
    assert!(matches!(&results[1], ContentBlock::ExecutedQueries(charts)
        if charts.len() == 1 && charts[0].admin_level.as_deref() == Some("admin_level_4")));

    assert_eq!(analytics.column_requests(), vec!["d-pop".to_string(), "d-gdp".to_string()]);
    assert_eq!(llm.calls(), 7);
    assert_eq!(llm.last_images(), vec!["iVBORw0KGgo=".to_string()]);
    assert_eq!(analytics.option_lookups.load(Ordering::SeqCst), 2);
    assert_eq!(analytics.explores.load(Ordering::SeqCst), 1);

    let events = sink.event_types();
    assert_eq!(events.iter().filter(|event| *event == "pipeline.stage_completed").count(), 6);
    assert_eq!(events.iter().filter(|event| *event == "flow.transition_applied").count(), 7);
    assert!(events.iter().all(|event| event != "pipeline.stage_skipped"));
}

#[tokio::test]
async fn search_disabled_degrades_to_the_analytics_route() {
    let llm = Arc::new(ScriptedLlm::new(
        vec![chart_plan(), "新北市人口最多。".to_string()],
        analytics_answers(),
    ));
    let analytics = Arc::new(FakeAnalytics::default());
    let pipeline =
        Pipeline::new(AppConfig::default(), Collaborators::new(llm.clone(), analytics.clone()))
            .expect("pipeline");

    let answer = pipeline.ask(QUESTION, Some("en"), None, &audit()).await.expect("answer");

    assert_eq!(answer.json_data, population_rows());
    assert_eq!(answer.text_response, "新北市人口最多。");
    assert_eq!(llm.calls(), 7);
}

#[tokio::test]
async fn unknown_dataset_keys_exhaust_after_five_attempts() {
    let llm = Arc::new(ScriptedLlm::new(
        Vec::new(),
        (0..5).map(|_| json!({"dataset_key": ["d-missing"]})).collect(),
    ));
    let analytics = Arc::new(FakeAnalytics::default());
    let sink = InMemoryAuditSink::default();
    let pipeline =
        Pipeline::new(AppConfig::default(), Collaborators::new(llm.clone(), analytics.clone()))
            .expect("pipeline")
            .with_audit_sink(Arc::new(sink.clone()));

    let error = pipeline
        .run(pipeline.new_state(QUESTION, None, None), &audit())
        .await
        .expect_err("no dataset can be selected");

    assert!(matches!(error, PipelineError::NoDatasetMatched { attempts: 5, .. }));
    assert_eq!(llm.calls(), 5);
    assert_eq!(analytics.explores.load(Ordering::SeqCst), 0);

    let failed = failed_stage_event(&sink);
    assert_eq!(failed.category, AuditCategory::Extraction);
    assert_eq!(failed.metadata.get("stage").map(String::as_str), Some("dataset_discovery"));
}

#[tokio::test]
async fn backend_failures_are_audited_as_collaborator_failures() {
    let llm = Arc::new(ScriptedLlm::default());
    let analytics = Arc::new(FakeAnalytics { search_fails: true, ..FakeAnalytics::default() });
    let sink = InMemoryAuditSink::default();
    let pipeline =
        Pipeline::new(AppConfig::default(), Collaborators::new(llm.clone(), analytics))
            .expect("pipeline")
            .with_audit_sink(Arc::new(sink.clone()));

    let error = pipeline
        .run(pipeline.new_state(QUESTION, None, None), &audit())
        .await
        .expect_err("catalog search fails");

    assert!(matches!(
        error,
        PipelineError::Collaborator { stage: PipelineStage::DatasetDiscovery, .. }
    ));
    assert_eq!(llm.calls(), 0);
    assert_eq!(failed_stage_event(&sink).category, AuditCategory::Collaborator);
}

#[tokio::test]
async fn web_failures_are_skipped_not_fatal() {
    let llm = Arc::new(ScriptedLlm::new(
        vec![chart_plan(), "answer".to_string()],
        analytics_answers(),
    ));
    let sink = InMemoryAuditSink::default();
    let collaborators = Collaborators::new(llm, Arc::new(FakeAnalytics::default()))
        .with_web(Arc::new(FakeSearch), Arc::new(FakeFetcher { fail: true }));

    let pipeline = Pipeline::new(web_config(), collaborators)
        .expect("pipeline")
        .with_audit_sink(Arc::new(sink.clone()));
    let state = pipeline
        .run(pipeline.new_state(QUESTION, None, None), &audit())
        .await
        .expect("pipeline completes without web content");

    assert_eq!(state.search_results().len(), 1);
    assert!(matches!(state.search_results()[0], ContentBlock::ExecutedQueries(_)));

    let skipped = sink
        .events()
        .into_iter()
        .find(|event| event.event_type == "pipeline.stage_skipped")
        .expect("skip is audited");
    assert_eq!(skipped.metadata.get("stage").map(String::as_str), Some("source_discovery"));
    assert_eq!(skipped.category, AuditCategory::Collaborator);
}

#[tokio::test]
async fn web_route_answers_without_chart_data() {
    let llm = Arc::new(ScriptedLlm::new(vec!["來自網路的回答".to_string()], Vec::new()));
    let analytics = Arc::new(FakeAnalytics::default());
    let collaborators = Collaborators::new(llm.clone(), analytics.clone())
        .with_web(Arc::new(FakeSearch), Arc::new(FakeFetcher { fail: false }));
    let pipeline = Pipeline::new(web_config(), collaborators).expect("pipeline");

    let answer = pipeline.ask(QUESTION, None, Some("web"), &audit()).await.expect("answer");

    assert_eq!(answer.json_data, Value::Null);
    assert_eq!(answer.text_response, "來自網路的回答");
    assert_eq!(llm.calls(), 1);
    assert_eq!(analytics.searches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stages_reject_a_response_of_the_wrong_kind() {
    let llm = ScriptedLlm::default();
    let analytics = FakeAnalytics::default();
    let admin_levels = AdminLevelTable::default();
    let ctx = StageContext { llm: &llm, analytics: &analytics, admin_levels: &admin_levels };

    let mut state = SharedState::new(QUESTION, "zh-TW");
    state.response = Some(StageResponse::ChartQueries(Vec::new()));

    let error = query_planning::run(&state, ctx).await.expect_err("datasets expected");

    assert_eq!(
        error,
        PipelineError::ResponseVariantMismatch {
            stage: PipelineStage::QueryPlanning,
            expected: "datasets",
            found: "chart_queries",
        }
    );
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn chart_plans_without_a_json_block_exhaust_after_five_attempts() {
    let llm = ScriptedLlm::new(
        (0..5).map(|_| "I would chart population.".to_string()).collect(),
        Vec::new(),
    );
    let analytics = FakeAnalytics::default();
    let admin_levels = AdminLevelTable::default();
    let ctx = StageContext { llm: &llm, analytics: &analytics, admin_levels: &admin_levels };
    let dataset = DatasetRecord {
        id: "d-pop".to_string(),
        name: "City population".to_string(),
        ..Default::default()
    };

    let error = query_planning::run(&state_with(StageResponse::Datasets(vec![dataset])), ctx)
        .await
        .expect_err("no plan can be parsed");

    assert!(matches!(error, PipelineError::QueryPlanningFailed { attempts: 5, .. }));
    assert_eq!(llm.calls(), 5);
    assert_eq!(analytics.column_requests(), vec!["d-pop".to_string()]);
}

#[tokio::test]
async fn missing_column_metadata_stops_planning_before_the_model() {
    let llm = ScriptedLlm::new(vec![chart_plan()], Vec::new());
    let analytics = FakeAnalytics { no_columns: true, ..FakeAnalytics::default() };
    let admin_levels = AdminLevelTable::default();
    let ctx = StageContext { llm: &llm, analytics: &analytics, admin_levels: &admin_levels };
    let dataset = DatasetRecord { id: "d-pop".to_string(), ..Default::default() };

    let error = query_planning::run(&state_with(StageResponse::Datasets(vec![dataset])), ctx)
        .await
        .expect_err("no columns");

    assert_eq!(error, PipelineError::ColumnMetadataUnavailable);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn filter_selection_for_unknown_charts_exhausts_after_five_attempts() {
    let llm = ScriptedLlm::new(
        Vec::new(),
        (0..5).map(|_| json!({"querys": [{"id": "d-unknown"}]})).collect(),
    );
    let analytics = FakeAnalytics::default();
    let admin_levels = AdminLevelTable::default();
    let ctx = StageContext { llm: &llm, analytics: &analytics, admin_levels: &admin_levels };

    let error = filter_resolution::run(&planned_state(), ctx)
        .await
        .expect_err("chart ids never match");

    assert!(matches!(error, PipelineError::FilterSelectionFailed { attempts: 5, .. }));
    assert_eq!(llm.calls(), 5);
    assert_eq!(analytics.option_lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unclassifiable_regions_fail_admin_level_resolution() {
    let llm = ScriptedLlm::new(
        Vec::new(),
        (0..5)
            .map(|_| json!({"datasets": [{"id": "d-pop", "region": "MARS", "language": "en"}]}))
            .collect(),
    );
    let analytics = FakeAnalytics::default();
    let admin_levels = AdminLevelTable::default();
    let ctx = StageContext { llm: &llm, analytics: &analytics, admin_levels: &admin_levels };

    let error = query_execution::run(&planned_state(), ctx)
        .await
        .expect_err("region has no admin level");

    assert!(matches!(error, PipelineError::AdminLevelResolutionFailed { attempts: 5, .. }));
    assert_eq!(llm.calls(), 5);
    assert_eq!(analytics.option_lookups.load(Ordering::SeqCst), 0);
    assert_eq!(analytics.explores.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn typeless_spatial_filters_with_unknown_levels_exhaust_the_option_lookup_pass() {
    let mut answers = vec![space_info()];
    answers.extend((0..5).map(|_| filtered_query_list("county")));
    let llm = ScriptedLlm::new(Vec::new(), answers);
    let analytics = FakeAnalytics::default();
    let admin_levels = AdminLevelTable::default();
    let ctx = StageContext { llm: &llm, analytics: &analytics, admin_levels: &admin_levels };

    let error = query_execution::run(&planned_state(), ctx)
        .await
        .expect_err("county is not an admin level");

    assert!(matches!(
        error,
        PipelineError::ExecutionParametersInvalid { attempts: 5, ref reason } if reason.contains("county")
    ));
    assert_eq!(llm.calls(), 6);
    assert_eq!(analytics.option_lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn every_accepted_option_lookup_attempt_reaches_the_backend() {
    let mut answers = vec![space_info()];
    answers.extend((0..4).map(|_| filtered_query_list("admin_level_4")));
    let llm = ScriptedLlm::new(Vec::new(), answers);
    let analytics =
        FakeAnalytics { failing_option_lookups: AtomicUsize::new(2), ..FakeAnalytics::default() };
    let admin_levels = AdminLevelTable::default();
    let ctx = StageContext { llm: &llm, analytics: &analytics, admin_levels: &admin_levels };

    let update = query_execution::run(&planned_state(), ctx)
        .await
        .expect("third lookup succeeds");

    assert_eq!(analytics.option_lookups.load(Ordering::SeqCst), 3);
    assert_eq!(analytics.explores.load(Ordering::SeqCst), 1);
    assert_eq!(llm.calls(), 5);
    let Some(StageResponse::ChartQueries(executed)) = update.response else {
        panic!("executed charts expected");
    };
    let filter = executed[0].filter.specs().next().expect("one filter");
    assert_eq!(filter.column.column_type.as_deref(), Some("space"));
    assert_eq!(filter.format.as_deref(), Some("admin_level_4"));
}

#[tokio::test]
async fn invalid_final_filters_exhaust_the_refinement_pass() {
    let mut answers = vec![space_info(), filtered_query_list("admin_level_4")];
    answers.extend((0..5).map(|_| filtered_query_list("admin_level_3")));
    let llm = ScriptedLlm::new(Vec::new(), answers);
    let analytics = FakeAnalytics::default();
    let admin_levels = AdminLevelTable::default();
    let ctx = StageContext { llm: &llm, analytics: &analytics, admin_levels: &admin_levels };

    let error = query_execution::run(&planned_state(), ctx)
        .await
        .expect_err("admin_level_3 is not a token");

    assert!(matches!(error, PipelineError::ExecutionParametersInvalid { attempts: 5, .. }));
    assert_eq!(llm.calls(), 7);
    assert_eq!(analytics.option_lookups.load(Ordering::SeqCst), 1);
    assert_eq!(analytics.explores.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn backend_returning_no_charts_is_an_empty_result() {
    let llm = ScriptedLlm::new(
        Vec::new(),
        vec![space_info(), filtered_query_list("admin_level_4"), filtered_query_list("admin_level_4")],
    );
    let analytics = FakeAnalytics { empty_explore: true, ..FakeAnalytics::default() };
    let admin_levels = AdminLevelTable::default();
    let ctx = StageContext { llm: &llm, analytics: &analytics, admin_levels: &admin_levels };

    let error = query_execution::run(&planned_state(), ctx)
        .await
        .expect_err("nothing executed");

    assert_eq!(error, PipelineError::EmptyExecutionResult);
    assert_eq!(analytics.explores.load(Ordering::SeqCst), 1);
}
