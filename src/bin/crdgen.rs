//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifests for the custom
//! resources owned by the hot-backup-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use hot_backup_operator::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
