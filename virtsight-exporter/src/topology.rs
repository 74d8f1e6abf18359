//! Domain device topology.

use crate::error::SourceError;

/// Kind of per-domain device a metric fans out over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Disk,
    Interface,
}

impl DeviceKind {
    /// Element name under `<devices>` in the domain XML.
    pub fn element(&self) -> &'static str {
        match self {
            DeviceKind::Disk => "disk",
            DeviceKind::Interface => "interface",
        }
    }

    /// Label key carrying the target name.
    pub fn label_key(&self) -> &'static str {
        match self {
            DeviceKind::Disk => "target_disk",
            DeviceKind::Interface => "target_interface",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.element())
    }
}

/// Disk and interface targets of a domain, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceTopology {
    disks: Vec<String>,
    interfaces: Vec<String>,
}

impl DeviceTopology {
    pub fn new(disks: Vec<String>, interfaces: Vec<String>) -> Self {
        Self { disks, interfaces }
    }

    /// Extract `devices/disk/target@dev` and `devices/interface/target@dev`
    /// from a libvirt domain description.
    ///
    /// Devices without a `target dev` (e.g. an interface of a stopped
    /// domain) are skipped.
    pub fn from_domain_xml(xml: &str) -> Result<Self, SourceError> {
        let doc =
            roxmltree::Document::parse(xml).map_err(|e| SourceError::Topology(e.to_string()))?;
        let root = doc.root_element();
        if !root.has_tag_name("domain") {
            return Err(SourceError::Topology(format!(
                "expected <domain> root element, found <{}>",
                root.tag_name().name()
            )));
        }

        let mut topology = DeviceTopology::default();
        let devices = root.children().filter(|n| n.has_tag_name("devices"));

        for device in devices.flat_map(|d| d.children()).filter(|n| n.is_element()) {
            let list = if device.has_tag_name(DeviceKind::Disk.element()) {
                &mut topology.disks
            } else if device.has_tag_name(DeviceKind::Interface.element()) {
                &mut topology.interfaces
            } else {
                continue;
            };

            let targets = device
                .children()
                .filter(|n| n.has_tag_name("target"))
                .filter_map(|n| n.attribute("dev"));
            list.extend(targets.map(str::to_string));
        }

        Ok(topology)
    }

    /// Targets of the given kind.
    pub fn targets(&self, kind: DeviceKind) -> &[String] {
        match kind {
            DeviceKind::Disk => &self.disks,
            DeviceKind::Interface => &self.interfaces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN_XML: &str = r#"
<domain type='kvm' id='3'>
  <name>web01</name>
  <uuid>4dea22b3-1d52-d8f3-2516-782e98ab3fa0</uuid>
  <devices>
    <emulator>/usr/bin/qemu-system-x86_64</emulator>
    <disk type='file' device='disk'>
      <source file='/var/lib/libvirt/images/web01.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <interface type='network'>
      <mac address='52:54:00:12:34:56'/>
      <target dev='vnet0'/>
    </interface>
    <disk type='file' device='cdrom'>
      <target dev='sda' bus='sata'/>
    </disk>
    <interface type='bridge'>
      <target dev='vnet1'/>
    </interface>
    <interface type='network'>
      <source network='default'/>
    </interface>
  </devices>
</domain>"#;

    #[test]
    fn test_targets_in_document_order() {
        let topology = DeviceTopology::from_domain_xml(DOMAIN_XML).unwrap();

        assert_eq!(topology.targets(DeviceKind::Disk), ["vda", "sda"]);
        assert_eq!(topology.targets(DeviceKind::Interface), ["vnet0", "vnet1"]);
    }

    #[test]
    fn test_domain_without_devices() {
        let topology =
            DeviceTopology::from_domain_xml("<domain><name>empty</name></domain>").unwrap();

        assert!(topology.targets(DeviceKind::Disk).is_empty());
        assert!(topology.targets(DeviceKind::Interface).is_empty());
    }

    #[test]
    fn test_nested_targets_are_ignored() {
        // Only direct <target> children of a device count
        let xml = r#"<domain><devices><disk><backingStore><target dev='x'/></backingStore><target dev='vdb'/></disk></devices></domain>"#;
        let topology = DeviceTopology::from_domain_xml(xml).unwrap();

        assert_eq!(topology.targets(DeviceKind::Disk), ["vdb"]);
    }

    #[test]
    fn test_invalid_xml() {
        let result = DeviceTopology::from_domain_xml("<domain><devices>");
        assert!(matches!(result, Err(SourceError::Topology(_))));
    }

    #[test]
    fn test_wrong_root_element() {
        let result = DeviceTopology::from_domain_xml("<network><name>default</name></network>");
        assert!(matches!(result, Err(SourceError::Topology(_))));
    }

    #[test]
    fn test_device_kind_labels() {
        assert_eq!(DeviceKind::Disk.label_key(), "target_disk");
        assert_eq!(DeviceKind::Interface.label_key(), "target_interface");
        assert_eq!(DeviceKind::Interface.to_string(), "interface");
    }
}
