// ── Export/import engine ──
//
// A registry of export plugins plus the pipelines around them. The
// engine owns filtering, metadata enrichment, secret redaction, history
// rows, and the download path guard; plugins only render and parse
// artifacts.

mod archive;
mod engine;
mod gitops;
mod hosts;
mod plugin;

pub use archive::ArchivePlugin;
pub use engine::ExportEngine;
pub use gitops::{deep_merge, GitopsPlugin};
pub use hosts::HostsPlugin;
pub use plugin::{
    ChangeType, ConfigSchema, ExportData, ExportFilters, ExportMetadata, ExportOutput,
    ExportPlugin, ExportRequest, ExportResult, ImportChange, ImportOptions, ImportPayload,
    ImportRequest, ImportResult, ImportSource, OutputSink, PluginCapabilities, PluginCategory,
    PluginExportResult, PluginMetadata, PortableConfiguration, PortableDevice, PortableTemplate,
    PreviewOutput, SchemaProperty,
};
