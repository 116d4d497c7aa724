/*
    Replica test suite

    - Last-write-wins by arrival (property based)
    - Concurrent mutation vs snapshot reads
*/

mod lww_properties;
