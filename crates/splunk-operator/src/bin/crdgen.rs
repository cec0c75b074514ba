use kube::core::CustomResourceExt;
use splunk_operator::crds::{
    enterprise::SplunkEnterprise, indexer::IndexerCluster, license_master::LicenseMaster,
    monitoring_console::MonitoringConsole, search_head::SearchHeadCluster, spark::Spark,
    standalone::Standalone,
};

fn main() {
    let crds = vec![
        Standalone::crd(),
        SearchHeadCluster::crd(),
        IndexerCluster::crd(),
        LicenseMaster::crd(),
        MonitoringConsole::crd(),
        Spark::crd(),
        SplunkEnterprise::crd(),
    ];
    for (i, crd) in crds.into_iter().enumerate() {
        if i > 0 {
            println!("---");
        }
        println!("{}", serde_yaml::to_string(&crd).expect("serialize crd"));
    }
}
