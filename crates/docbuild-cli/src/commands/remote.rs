//! Commands that talk to a running daemon.

use crate::ServerArgs;
use crate::client::{ApiClient, ClientError};
use crate::commands::token::client_token;
use crate::output;
use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use docbuild_config::SystemConfig;
use docbuild_core::protocol::{
    ProjectListResponse, Request, StatusResponse, TriggerResponse, ViewLogResponse,
};
use serde_json::Value;
use std::net::IpAddr;

fn connect(config: &SystemConfig, server: &ServerArgs) -> Result<ApiClient> {
    let listen = config.api.listen;
    let host = server.host.clone().unwrap_or_else(|| default_host(listen.ip()));
    let port = server.port.unwrap_or(listen.port());
    Ok(ApiClient::connect(&host, port)?)
}

/// A wildcard listen address is reached through the loopback interface.
fn default_host(ip: IpAddr) -> String {
    if ip.is_unspecified() {
        "localhost".to_string()
    } else {
        ip.to_string()
    }
}

fn request<T: serde::de::DeserializeOwned>(client: &mut ApiClient, request: &Request) -> Result<T> {
    client.request(request).map_err(|e| match e {
        ClientError::Fatal(fatal) => anyhow::Error::new(fatal),
        ClientError::Server(message) => anyhow!(message),
    })
}

pub fn status(config: &SystemConfig, server: &ServerArgs) -> Result<()> {
    let mut client = connect(config, server)?;
    let status: StatusResponse = request(&mut client, &Request::Status)?;
    println!("{}", output::status(&status));
    Ok(())
}

pub fn trigger(
    config: &SystemConfig,
    server: &ServerArgs,
    projects: Vec<String>,
    dc_files: Vec<String>,
) -> Result<()> {
    if projects.is_empty() && dc_files.is_empty() {
        return Err(anyhow!("nothing to trigger, pass --project or --dc-file"));
    }
    let token = client_token(config)?
        .ok_or_else(|| anyhow!("no client token, run `docbuild token regenerate` first"))?;

    let mut client = connect(config, server)?;
    let accepted: TriggerResponse = request(
        &mut client,
        &Request::TriggerBuild {
            token,
            projects: projects.clone(),
            dc_files: dc_files.clone(),
        },
    )?;

    for name in &accepted.projects {
        println!("Triggered project {}", name);
    }
    for name in &accepted.dc_files {
        println!("Triggered DC file {}", name);
    }
    for name in projects.iter().filter(|p| !accepted.projects.contains(p)) {
        eprintln!("Unknown project: {}", name);
    }
    for name in dc_files.iter().filter(|d| !accepted.dc_files.contains(d)) {
        eprintln!("Unknown DC file: {}", name);
    }
    Ok(())
}

pub fn projects(config: &SystemConfig, server: &ServerArgs) -> Result<()> {
    let mut client = connect(config, server)?;
    let list: ProjectListResponse = request(&mut client, &Request::ProjectList)?;

    let rows: Vec<Vec<String>> = list
        .projects
        .iter()
        .map(|(name, docs)| {
            let docs = docs
                .as_array()
                .map(|d| d.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            vec![name.clone(), docs]
        })
        .collect();
    println!("{}", output::table(&["PROJECT", "DC FILES"], &rows));
    Ok(())
}

pub fn log(config: &SystemConfig, server: &ServerArgs, dc_file: &str, format: &str) -> Result<()> {
    let mut client = connect(config, server)?;
    let reply: ViewLogResponse = request(
        &mut client,
        &Request::ViewLog {
            dc_file: dc_file.to_string(),
            format: format.to_string(),
        },
    )?;

    let content = STANDARD
        .decode(reply.log.as_bytes())
        .map_err(|e| docbuild_core::exit::FatalError::ApiInvalidData(e.to_string()))?;
    print!("{}", String::from_utf8_lossy(&content));
    Ok(())
}
