use std::sync::Arc;

use funnel_timing::{
    configure_chart_font, funnel_router, init_logging, log_app_bind, log_app_start,
    log_chart_config, logging_config_from_env, server_config_from_env, ChartRenderer,
    PlottersRenderer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let server_cfg = server_config_from_env()?;
    let resolved_font = configure_chart_font(&server_cfg.chart.font_family);
    log_chart_config(&server_cfg, resolved_font);

    let renderer: Arc<dyn ChartRenderer> = Arc::new(PlottersRenderer::new(server_cfg.chart.clone()));
    let app = funnel_router(renderer, server_cfg.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(server_cfg.bind_addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr, &server_cfg);
    axum::serve(listener, app).await?;

    Ok(())
}
