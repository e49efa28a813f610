use crate::TemplateDefinition;

const COMPOSE_VERSION: &str = "1.29.2";

/// Render the user-data script that boots a template on a fresh droplet.
///
/// The script installs docker-compose, writes the template's compose file to
/// `/app`, starts the stack and installs a cron job that records container
/// status every five minutes.
pub fn render_cloud_init(template: &TemplateDefinition) -> String {
    let compose = template.compose.trim_end();

    format!(
        r#"#!/bin/bash
# {name} ({id})
apt-get update && apt-get upgrade -y

curl -L "https://github.com/docker/compose/releases/download/{compose_version}/docker-compose-$(uname -s)-$(uname -m)" -o /usr/local/bin/docker-compose
chmod +x /usr/local/bin/docker-compose

mkdir -p /app
cd /app

cat > docker-compose.yml << 'EOF'
{compose}
EOF

docker-compose up -d

cat > /etc/cron.d/ai-stack-monitor << 'EOF'
*/5 * * * * root cd /app && docker-compose ps >> /var/log/stack-status.log
EOF
"#,
        name = template.name,
        id = template.id,
        compose_version = COMPOSE_VERSION,
        compose = compose,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateCatalog;

    #[test]
    fn test_script_embeds_compose_file() {
        let catalog = TemplateCatalog::bundled().unwrap();
        let template = catalog.get("ollama-webui").unwrap();
        let script = render_cloud_init(template);

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("image: ghcr.io/open-webui/open-webui:main"));
        assert!(script.contains("docker-compose up -d"));
        assert!(script.contains("*/5 * * * * root cd /app"));
    }

    #[test]
    fn test_heredocs_are_balanced() {
        let catalog = TemplateCatalog::bundled().unwrap();
        for id in catalog.template_ids() {
            let script = render_cloud_init(catalog.get(id).unwrap());
            let openers = script.matches("<< 'EOF'").count();
            let closers = script.lines().filter(|l| *l == "EOF").count();
            assert_eq!(openers, 2, "{}", id);
            assert_eq!(closers, 2, "{}", id);
        }
    }
}
