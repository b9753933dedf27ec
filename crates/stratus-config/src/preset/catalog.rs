use serde_json::{Value, json};

use super::{Preset, PresetId, PresetSource};

pub(super) fn definition(id: PresetId) -> Preset {
    match id {
        PresetId::Node => Preset::new(json!({
            "entry": "#internal/stratus/entries/node",
            "externals": true
        })),
        PresetId::NodeServer => Preset::new(json!({
            "entry": "#internal/stratus/entries/node-server",
            "serveStatic": true,
            "commands": { "preview": "node ./server/index.mjs" }
        }))
        .extends("node"),
        PresetId::NodeCli => Preset::new(json!({
            "entry": "#internal/stratus/entries/cli",
            "commands": { "preview": "Run with node ./server/index.mjs [route]" }
        }))
        .extends("node"),
        PresetId::Dev => Preset::new(json!({
            "entry": "#internal/stratus/entries/dev",
            "output": { "serverDir": "{{ buildDir }}/dev" },
            "externals": { "trace": false },
            "inlineDynamicImports": true,
            "sourceMap": true
        }))
        .extends("node"),
        PresetId::Prerender => Preset::new(json!({
            "entry": "#internal/stratus/entries/prerender",
            "output": { "serverDir": "{{ buildDir }}/prerender" },
            "commands": { "preview": "npx serve -s ./public" },
            "externals": { "trace": false }
        }))
        .extends("node"),
        PresetId::BaseWorker => Preset::new(json!({
            "entry": null,
            "node": false,
            "minify": true,
            "noExternals": true,
            "format": "iife",
            "inlineDynamicImports": true
        })),
        PresetId::Cloudflare => Preset::new(json!({
            "entry": "#internal/stratus/entries/cloudflare",
            "commands": {
                "preview": "npx miniflare ./server/index.mjs --site ./public",
                "deploy": "cd ./server && npx wrangler publish"
            }
        }))
        .extends("base-worker"),
        PresetId::ServiceWorker => Preset {
            extends: vec!["base-worker".to_string()],
            source: PresetSource::Deferred(service_worker),
        },
        PresetId::AwsLambda => Preset::new(json!({
            "entry": "#internal/stratus/entries/aws-lambda",
            "externals": true
        })),
        PresetId::Netlify => Preset::new(json!({
            "output": {
                "dir": "{{ rootDir }}/.netlify/functions-internal",
                "publicDir": "{{ rootDir }}/dist"
            },
            "entryFileName": "server.ts"
        }))
        .extends("aws-lambda"),
        PresetId::NetlifyBuilder => Preset::new(json!({
            "entry": "#internal/stratus/entries/netlify-builder"
        }))
        .extends("netlify"),
        PresetId::NetlifyEdge => Preset::new(json!({
            "entry": "#internal/stratus/entries/netlify-edge",
            "output": {
                "serverDir": "{{ rootDir }}/.netlify/edge-functions",
                "publicDir": "{{ rootDir }}/dist"
            },
            "entryFileName": "server.js"
        }))
        .extends("base-worker"),
        PresetId::Vercel => Preset::new(json!({
            "entry": "#internal/stratus/entries/vercel",
            "output": {
                "dir": "{{ rootDir }}/.vercel_build_output",
                "serverDir": "{{ output.dir }}/functions/node/server",
                "publicDir": "{{ output.dir }}/static"
            }
        }))
        .extends("node"),
        PresetId::RenderCom | PresetId::Heroku | PresetId::DigitalOcean => {
            Preset::new(json!({})).extends("node-server")
        }
        PresetId::Stormkit => Preset::new(json!({
            "entry": "#internal/stratus/entries/stormkit",
            "externals": true,
            "output": { "dir": "{{ rootDir }}/.stormkit" }
        })),
    }
}

fn service_worker() -> Value {
    json!({
        "entry": "#internal/stratus/entries/service-worker",
        "output": { "serverDir": "{{ output.dir }}/public/server" },
        "commands": { "preview": "npx serve ./public" }
    })
}
