use k8s_openapi::api::apps::v1::Deployment;
use kube::api::ListParams;
use kube::{Api, Client};

use kube_scaler::crd::GeneralScaler;

pub async fn run() -> anyhow::Result<()> {
    println!("Running cluster connectivity checks...\n");

    // 1. Build Kubernetes client from kubeconfig
    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {}", e);
        }
    };

    // 2. Verify actual cluster connectivity by fetching server version
    print!("  Cluster connection .......... ");
    let version = match client.apiserver_version().await {
        Ok(v) => {
            println!("OK (v{}.{})", v.major, v.minor);
            Some(v)
        }
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {}", e);
            println!("  Hint:  Is the cluster running? Check with: kubectl cluster-info\n");
            return Ok(());
        }
    };

    // 3. List deployments permission (scale targets)
    print!("  List deployments permission . ");
    let deployments: Api<Deployment> = Api::all(client.clone());
    match deployments.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({})", e),
    }

    // 4. List GeneralScalers (CRD installed + permission)
    print!("  List generalscalers ......... ");
    let scalers: Api<GeneralScaler> = Api::all(client.clone());
    match scalers.list(&ListParams::default()).await {
        Ok(scaler_list) => {
            let count = scaler_list.items.len();
            println!("OK ({} scalers)", count);
        }
        Err(e) => {
            println!("FAIL ({})", e);
            println!("  Hint:  Install the CRD with: kube-scaler crd install");
        }
    }

    // 5. Kubernetes version (already fetched above)
    if let Some(v) = version {
        println!("\n  Kubernetes version: {}.{}", v.major, v.minor);
    }

    println!("\nAll checks completed.");
    Ok(())
}
