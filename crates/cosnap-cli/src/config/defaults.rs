pub struct DefaultsConfig {
    pub length_unit: String,
    pub time_unit: String,
    pub mass_unit: String,
    pub boxsize: String,
    pub h0: f64,
    pub omega_cdm: f64,
    pub omega_b: f64,
    pub a_begin: f64,
    pub enable_hubble: bool,
    pub snapshot_type: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            length_unit: "kpc".to_string(),
            time_unit: "Gyr".to_string(),
            mass_unit: "1e10*m_sun".to_string(),
            boxsize: "100*Mpc".to_string(),
            h0: 67.7,
            omega_cdm: 0.26,
            omega_b: 0.049,
            a_begin: 1.0,
            enable_hubble: true,
            snapshot_type: "standard".to_string(),
        }
    }
}
