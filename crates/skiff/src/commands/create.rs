use crate::progress;
use crate::provision::SshProvisioner;
use colored::Colorize;
use skiff_cloud::{StateStore, default_cache_path};
use skiff_cloud_aws::keys;
use skiff_core::load_spec;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SSH_READY_TIMEOUT: Duration = Duration::from_secs(300);

pub async fn handle(
    config: PathBuf,
    cache: Option<PathBuf>,
    post_script: Option<PathBuf>,
    no_provision: bool,
) -> anyhow::Result<()> {
    let spec = load_spec(&config)?;
    let cache_path = cache.unwrap_or_else(|| default_cache_path(&spec.name));

    println!("environment: {}", spec.name.cyan());
    println!("region:      {}", spec.region.cyan());
    if let Some(cluster) = &spec.cluster {
        println!(
            "cluster:     {} control-plane / {} worker{}",
            cluster.control_plane.count,
            cluster.workers.count,
            if cluster.ha { " (HA)" } else { "" }
        );
    }
    println!();

    let mut provider = super::connect(spec.clone(), &cache_path).await?;
    let pb = progress::spinner(format!("creating environment via {}", provider.name()));
    match provider.create().await {
        Ok(()) => pb.finish_with_message(format!("{} environment available", "✓".green())),
        Err(e) => {
            pb.finish_with_message(format!("{} create failed", "✗".red()));
            print_failure_help(&cache_path);
            return Err(e.into());
        }
    }

    // Everything below reads the durable record, not in-memory state.
    let env = StateStore::new(&cache_path).load().await?;
    let status = &env.status;

    let host = status
        .property(keys::CONTROL_PLANE_ENDPOINT)
        .or_else(|| status.property(keys::PUBLIC_DNS_NAME))
        .or_else(|| status.property(keys::PUBLIC_IP))
        .map(str::to_string);
    let username = spec
        .auth
        .username
        .clone()
        .or_else(|| status.property(keys::SSH_USERNAME).map(str::to_string));

    match (&host, &username) {
        (Some(host), Some(username)) => {
            println!();
            println!("host: {}", format!("{username}@{host}").bold());
        }
        (Some(host), None) => println!("host: {}", host.bold()),
        _ => {}
    }
    println!("cache: {}", cache_path.display());

    if no_provision {
        return Ok(());
    }

    // Hand the host to the SSH provisioner: wait for sshd, run the
    // configuration script, and for clusters fetch the credential file.
    let ssh_host = ssh_target(status);
    if let (Some(host), Some(username)) = (ssh_host, username) {
        let ssh = SshProvisioner::new(
            spec.auth.private_key_path.clone(),
            username,
            host,
        );

        let pb = progress::spinner("waiting for SSH");
        match ssh.wait_ready(SSH_READY_TIMEOUT).await {
            Ok(()) => pb.finish_with_message(format!("{} SSH ready", "✓".green())),
            Err(e) => {
                pb.finish_with_message(format!("{} SSH not reachable", "✗".red()));
                return Err(e);
            }
        }

        if let Some(script) = post_script {
            let pb = progress::spinner(format!("running {}", script.display()));
            ssh.run_script(&script).await?;
            pb.finish_with_message(format!("{} script finished", "✓".green()));
        }

        if spec.install.kubernetes && spec.is_cluster() {
            let local = kubeconfig_path(&cache_path);
            match ssh.fetch_file("/etc/kubernetes/admin.conf", &local).await {
                Ok(()) => println!("kubeconfig: {}", local.display()),
                Err(e) => {
                    tracing::warn!(error = %e, "could not fetch kubeconfig (is the cluster configured yet?)");
                }
            }
        }
    }

    Ok(())
}

/// SSH goes to a concrete node, never through the load balancer: the first
/// node's public address.
fn ssh_target(status: &skiff_cloud::status::EnvironmentStatus) -> Option<String> {
    if let Some(cluster) = &status.cluster {
        return cluster
            .nodes
            .first()
            .and_then(|n| n.public_dns.clone().or_else(|| n.public_ip.clone()));
    }
    status
        .property(keys::PUBLIC_DNS_NAME)
        .or_else(|| status.property(keys::PUBLIC_IP))
        .map(str::to_string)
}

fn kubeconfig_path(cache_path: &Path) -> PathBuf {
    cache_path.with_extension("kubeconfig")
}

fn print_failure_help(cache_path: &Path) {
    eprintln!();
    eprintln!(
        "{}",
        "the environment may be partially created; its resource ids are in the cache file".yellow()
    );
    if std::env::var_os("CI").is_some() {
        eprintln!(
            "add a cleanup step: skiff delete --cache {}",
            cache_path.display()
        );
    } else {
        eprintln!("inspect:  skiff status --cache {}", cache_path.display());
        eprintln!("clean up: skiff delete --cache {}", cache_path.display());
    }
}
