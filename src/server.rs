//! HTTP surface: start page, upload page and the `/run` analysis endpoint.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

use crate::charts::{render_charts, ChartData, ChartRenderer, RenderedCharts};
use crate::funnel::{analyze_stage, StageAnalysis};
use crate::ingest::{read_table, UploadFormat};
use crate::report::FunnelReport;
use crate::stage::{Stage, ALL_STAGES};
use crate::table::Table;

pub const INVALID_MODULE_MESSAGE: &str = "module must be one of 1/2/3";
pub const UNSUPPORTED_FILE_MESSAGE: &str = "please upload an .xlsx, .xls or .csv file";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<Stage>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub result: Option<FunnelReport>,
    pub pie_png_base64: String,
    pub bar_png_base64: String,
}

impl AnalysisResponse {
    pub fn failure(module: Option<Stage>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            module,
            errors: vec![message.into()],
            warnings: Vec::new(),
            result: None,
            pie_png_base64: String::new(),
            bar_png_base64: String::new(),
        }
    }

    fn success(stage: Stage, analysis: StageAnalysis, charts: RenderedCharts) -> Self {
        Self {
            ok: true,
            module: Some(stage),
            errors: Vec::new(),
            warnings: analysis.warnings,
            result: Some(analysis.report),
            pie_png_base64: charts.pie_png_base64,
            bar_png_base64: charts.bar_png_base64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Full request flow for one upload: selector, file type, parse, analyze, render.
pub fn run_upload(module: &str, upload: &Upload, renderer: &dyn ChartRenderer) -> AnalysisResponse {
    let Ok(stage) = module.parse::<Stage>() else {
        return AnalysisResponse::failure(None, INVALID_MODULE_MESSAGE);
    };

    if UploadFormat::from_file_name(&upload.file_name).is_none() {
        return AnalysisResponse::failure(None, UNSUPPORTED_FILE_MESSAGE);
    }

    let table = match read_table(&upload.file_name, &upload.bytes) {
        Ok(table) => table,
        Err(err) => {
            return AnalysisResponse::failure(None, format!("failed to read spreadsheet: {err}"));
        }
    };

    run_stage(stage, &table, renderer)
}

pub fn run_stage(stage: Stage, table: &Table, renderer: &dyn ChartRenderer) -> AnalysisResponse {
    let analysis = match analyze_stage(table, stage) {
        Ok(analysis) => analysis,
        Err(err) => return AnalysisResponse::failure(Some(stage), err.to_string()),
    };

    let charts = match ChartData::for_stage(stage.descriptor(), &analysis) {
        Some(data) => match render_charts(renderer, &data) {
            Ok(charts) => charts,
            Err(err) => {
                error!(
                    component = "server",
                    event = "analysis.failed",
                    stage = stage.id(),
                    error = %err
                );
                return AnalysisResponse::failure(None, format!("analysis failed: {err}"));
            }
        },
        None => RenderedCharts::default(),
    };

    AnalysisResponse::success(stage, analysis, charts)
}

#[derive(Clone)]
struct FunnelAppState {
    renderer: Arc<dyn ChartRenderer>,
}

pub fn funnel_router(renderer: Arc<dyn ChartRenderer>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(get_start_page))
        .route("/app", get(get_app_page))
        .route("/run", post(post_run))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(FunnelAppState { renderer })
}

pub fn render_start_page() -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>Funnel Timing Reports</title>\n");
    out.push_str(PAGE_STYLE);
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str("<section class=\"hero\"><h1>Funnel Timing Reports</h1>");
    out.push_str("<p>Upload a user lifecycle sheet and see how long each funnel step takes.</p>");
    out.push_str("<a class=\"btn\" href=\"/app\">Start analysis</a></section>\n");
    out.push_str("<section class=\"card\"><ul>");
    for stage in ALL_STAGES {
        out.push_str(&format!(
            "<li><b>Module {}</b>: {}</li>",
            stage.id(),
            escape_html(stage.descriptor().bar_title)
        ));
    }
    out.push_str("</ul></section>\n");
    out.push_str("</main></body></html>\n");
    out
}

pub fn render_app_page() -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>Funnel Timing Reports</title>\n");
    out.push_str(PAGE_STYLE);
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str("<section class=\"hero\"><h1>Run a report</h1></section>\n");
    out.push_str("<section class=\"card\"><form id=\"run-form\" enctype=\"multipart/form-data\">\n");
    out.push_str("<label>Module <select name=\"module\">");
    for stage in ALL_STAGES {
        let desc = stage.descriptor();
        let required: Vec<&str> = desc.required.iter().map(|column| column.header()).collect();
        out.push_str(&format!(
            "<option value=\"{}\">{} ({})</option>",
            stage.id(),
            escape_html(desc.bar_title),
            escape_html(&required.join(", "))
        ));
    }
    out.push_str("</select></label>\n");
    out.push_str("<label>Sheet <input type=\"file\" name=\"file\" accept=\".xlsx,.xls,.csv\"></label>\n");
    out.push_str("<button class=\"btn\" type=\"submit\">Analyze</button></form></section>\n");
    out.push_str("<section class=\"card\"><div id=\"messages\"></div>");
    out.push_str("<div class=\"charts\"><img id=\"bar\" alt=\"\"><img id=\"pie\" alt=\"\"></div>");
    out.push_str("<pre id=\"result\"></pre></section>\n");
    out.push_str("<script>\n");
    out.push_str("const form=document.getElementById('run-form');\n");
    out.push_str("form.addEventListener('submit',async(ev)=>{ev.preventDefault();\n");
    out.push_str("const res=await fetch('/run',{method:'POST',body:new FormData(form)});\n");
    out.push_str("const data=await res.json();\n");
    out.push_str("document.getElementById('messages').textContent=[...data.errors,...data.warnings].join(' | ');\n");
    out.push_str("document.getElementById('result').textContent=JSON.stringify(data.result,null,2);\n");
    out.push_str("for(const [id,key] of [['bar','bar_png_base64'],['pie','pie_png_base64']]){const img=document.getElementById(id);img.src=data[key]?'data:image/png;base64,'+data[key]:'';img.hidden=!data[key];}\n");
    out.push_str("});\n</script>\n");
    out.push_str("</main></body></html>\n");
    out
}

const PAGE_STYLE: &str = "<style>body{margin:0;color:#182026;font-family:\"Segoe UI\",\"Noto Sans CJK SC\",sans-serif;background:linear-gradient(160deg,#f5f1e7,#e9f0f2);min-height:100vh}.shell{max-width:1100px;margin:0 auto;padding:24px 18px}.hero{background:linear-gradient(135deg,#102f3a 0%,#24576b 100%);color:#f7fbfc;border-radius:16px;padding:18px 20px}.hero h1{margin:0 0 8px;font-size:1.6rem}.card{margin-top:16px;background:#fff;border:1px solid #cbd4db;border-radius:16px;padding:16px}.btn{display:inline-block;background:#0c5f78;color:#fff;text-decoration:none;border:0;padding:8px 14px;border-radius:9px;font-weight:700;cursor:pointer}label{display:block;margin-bottom:10px}.charts img{max-width:100%;display:block;margin-bottom:12px}pre{white-space:pre-wrap;font-size:.8rem}</style>\n";

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Default)]
struct RunForm {
    module: Option<String>,
    upload: Option<Upload>,
}

async fn read_run_form(mut multipart: Multipart) -> Result<RunForm, String> {
    let mut form = RunForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| format!("invalid upload: {err}"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "module" => {
                form.module = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| format!("invalid upload: {err}"))?,
                );
            }
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| format!("invalid upload: {err}"))?;
                form.upload = Some(Upload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn get_start_page() -> impl IntoResponse {
    Html(render_start_page())
}

async fn get_app_page() -> impl IntoResponse {
    Html(render_app_page())
}

async fn post_run(State(state): State<FunnelAppState>, multipart: Multipart) -> impl IntoResponse {
    let form = match read_run_form(multipart).await {
        Ok(form) => form,
        Err(message) => return Json(AnalysisResponse::failure(None, message)),
    };
    let Some(module) = form.module else {
        return Json(AnalysisResponse::failure(None, "missing form field: module"));
    };
    let Some(upload) = form.upload else {
        return Json(AnalysisResponse::failure(None, "missing form field: file"));
    };

    info!(
        component = "server",
        event = "http.run.request",
        module = %module,
        file_name = %upload.file_name,
        bytes = upload.bytes.len()
    );

    let renderer = Arc::clone(&state.renderer);
    let response =
        tokio::task::spawn_blocking(move || run_upload(&module, &upload, renderer.as_ref()))
            .await
            .unwrap_or_else(|err| {
                error!(
                    component = "server",
                    event = "analysis.failed",
                    error = %err
                );
                AnalysisResponse::failure(None, format!("analysis failed: {err}"))
            });

    Json(response)
}
