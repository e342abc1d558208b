use opcua::server::prelude::*;
use separation_twin::simulator::ProcessSnapshot;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

const NAMESPACE: u16 = 2;

#[derive(Debug, Clone, PartialEq)]
enum TagValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl From<TagValue> for Variant {
    fn from(value: TagValue) -> Self {
        match value {
            TagValue::Number(v) => Variant::from(v),
            TagValue::Flag(v) => Variant::from(v),
            TagValue::Text(v) => Variant::from(UAString::from(v)),
        }
    }
}

/// `Folder.Name` tags published for a snapshot.
fn tags(s: &ProcessSnapshot) -> Vec<(String, TagValue)> {
    use TagValue::*;
    let mut tags = Vec::new();
    let mut push = |name: &str, value: TagValue| tags.push((name.to_string(), value));

    for lp in &s.loops {
        let folder = lp.tag.replace('-', "");
        push(&format!("{folder}.PV"), Number(lp.pv));
        push(&format!("{folder}.SP"), Number(lp.setpoint));
        push(&format!("{folder}.OUT"), Number(lp.output()));
        push(&format!("{folder}.Mode"), Text(format!("{:?}", lp.mode)));
    }

    push("Centrifuge.GForce", Number(s.process.g_force));
    push("Centrifuge.OilEfficiency", Number(s.process.oil_efficiency));
    push("Centrifuge.SolidsEfficiency", Number(s.process.solids_efficiency));
    push("Centrifuge.Vibration", Number(s.process.vibration));
    push("Centrifuge.Status", Text(format!("{:?}", s.centrifuge.status)));

    push("Quality.CentrifugeOiW", Number(s.process.water_quality));
    push("Quality.FilteredOiW", Number(s.filter.outlet_oiw));
    push("Quality.TRH", Number(s.filter.trh));
    push("Quality.COD", Number(s.filter.cod));
    push("Quality.Turbidity", Number(s.filter.outlet_turbidity));
    push("Quality.pH", Number(s.process.ph));

    push("F301.Status", Text(format!("{:?}", s.filter.status)));
    push("F301.DifferentialPressure", Number(s.filter.differential_pressure));
    push("F301.BedSaturation", Number(s.filter.bed_saturation));
    push("F301.BackwashCycles", Number(f64::from(s.filter.backwash_cycles)));

    push("AQC.Status", Text(format!("{:?}", s.aqc.status)));
    push("AQC.Mode", Text(format!("{:?}", s.aqc.mode)));
    push("AQC.QualityScore", Number(s.aqc.quality_score));

    push("Run.SimTime", Number(s.sim_time));
    push("Run.Running", Flag(s.running));
    push("Run.Interlock", Flag(s.interlock));
    push("Run.Phase", Text(s.batch.phase_name.clone().unwrap_or_default()));
    push("Run.Processed", Number(s.batch.processed));
    push("Run.Remaining", Number(s.batch.remaining));
    push("Run.MassBalanceClosure", Number(s.mass_balance_closure));
    push("Run.ActiveAlarms", Number(s.alarms.len() as f64));
    tags
}

fn node(name: &str) -> NodeId {
    NodeId::new(NAMESPACE, name.to_string())
}

pub async fn start_opcua_server(
    port: u16,
    snapshot: Arc<RwLock<ProcessSnapshot>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::info!("Starting OPC UA tag server on port {}", port);

    let server = ServerBuilder::new()
        .application_name("SeparationTrain")
        .application_uri("urn:SeparationTrain")
        .discovery_urls(vec!["/".into()])
        .create_sample_keypair(true)
        .pki_dir("./pki-separation")
        .discovery_server_url(None)
        .host_and_port("0.0.0.0", port)
        .server()
        .ok_or("invalid OPC UA server configuration")?;

    let initial = tags(&*snapshot.read().await);
    {
        let address_space = server.address_space();
        let mut address_space = address_space.write();

        let root = address_space
            .add_folder("SeparationTrain", "SeparationTrain", &NodeId::objects_folder_id())
            .map_err(|_| "failed to add SeparationTrain folder")?;

        let folders: BTreeSet<&str> = initial
            .iter()
            .filter_map(|(name, _)| name.split_once('.').map(|(folder, _)| folder))
            .collect();
        for folder in folders {
            let folder_id = address_space
                .add_folder(folder, folder, &root)
                .map_err(|_| format!("failed to add {folder} folder"))?;
            let variables: Vec<Variable> = initial
                .iter()
                .filter(|(name, _)| name.split_once('.').is_some_and(|(f, _)| f == folder))
                .map(|(name, value)| {
                    let browse = name.rsplit('.').next().unwrap_or(name);
                    Variable::new(&node(name), browse, browse, Variant::from(value.clone()))
                })
                .collect();
            address_space.add_variables(variables, &folder_id);
        }
    }

    let address_space = server.address_space();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(100));

        loop {
            interval.tick().await;

            let current = tags(&*snapshot.read().await);
            let now = DateTime::now();
            let mut address_space = address_space.write();
            for (name, value) in current {
                let _ = address_space.set_variable_value(node(&name), Variant::from(value), &now, &now);
            }
        }
    });

    // The opcua server drives its own runtime
    tokio::task::spawn_blocking(move || server.run()).await?;
    Ok(())
}
